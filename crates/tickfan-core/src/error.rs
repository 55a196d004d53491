use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
