// Licensed under the Apache-2.0 license

use thiserror::Error;

const EIO: i32 = 5;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const EEXIST: i32 = 17;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const EPIPE: i32 = 32;
const ETIMEDOUT: i32 = 110;
const ECANCELED: i32 = 125;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CldmaError {
    #[error("request budget exhausted, retry later")]
    Busy,
    #[error("out of descriptor or buffer memory")]
    NoMemory,
    #[error("DMA mapping failed")]
    MapFailed,
    #[error("hardware queue {0} is outside the supported set")]
    InvalidQueue(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("virtual queue {0} is already open")]
    QueueExists(usize),
    #[error("queue is not open")]
    QueueNotOpen,
    #[error("queue is stopping")]
    Stopping,
    #[error("request cancelled by queue teardown")]
    Cancelled,
    #[error("link to the modem is down")]
    LinkDown,
    #[error("hardware did not respond in time")]
    Timeout,
    #[error("hardware version {0:#x} is not supported")]
    Unsupported(u32),
}

impl CldmaError {
    /// Negative Linux-style status code for callers that speak errno.
    pub fn errno(&self) -> i32 {
        -match self {
            CldmaError::Busy => EBUSY,
            CldmaError::NoMemory | CldmaError::MapFailed => ENOMEM,
            CldmaError::InvalidQueue(_) | CldmaError::InvalidArgument(_) => EINVAL,
            CldmaError::QueueExists(_) => EEXIST,
            CldmaError::QueueNotOpen | CldmaError::Unsupported(_) => ENODEV,
            CldmaError::Stopping => EPIPE,
            CldmaError::Cancelled => ECANCELED,
            CldmaError::LinkDown => EIO,
            CldmaError::Timeout => ETIMEDOUT,
        }
    }

    /// The caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CldmaError::Busy)
    }

    /// The hardware instance needs an external reset.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CldmaError::LinkDown)
    }
}

pub type CldmaResult<T> = Result<T, CldmaError>;
