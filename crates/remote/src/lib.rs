#![forbid(unsafe_code)]

pub mod dto;
pub mod gateway;
pub mod http;
pub mod memory;

pub use gateway::{
    CourseGateway, ProgressGateway, QuizGateway, QuizSubmission, Remote, RemoteError,
    SavedQuizProgress, SubmissionResult,
};
pub use http::{HttpConfig, HttpGateway};
pub use memory::{InMemoryGateway, RemoteCall};
