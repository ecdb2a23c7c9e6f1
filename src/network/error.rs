use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Medium closed")]
    MediumClosed,

    #[error("Frame of {size} bytes exceeds MTU of {mtu}")]
    FrameTooLarge { size: usize, mtu: usize },

    #[error("Unknown port {0}")]
    UnknownPort(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
