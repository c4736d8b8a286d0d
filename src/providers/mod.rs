pub mod openai;
pub mod streaming;
pub mod upstream;

pub use openai::OpenAIUpstream;
pub use upstream::{
    CallOptions, ResponseEventStream, Transcript, TranscriptionParams, UploadFile, UploadSource,
    Upstream,
};
