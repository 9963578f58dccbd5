//! 错误类型：只用于不变量违例（编程错误），停止请求与设计内的空操作不走这里
use thiserror::Error;

use crate::types::EngineIndex;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EodError {
    #[error("engine artifact does not require an EOD check")]
    MissingEodCheck,

    #[error("offset {offset} exceeds max bi-anchored width {bound}")]
    OffsetBeyondBound { offset: u64, bound: u64 },

    #[error("stream was already terminated by a halt request")]
    StreamTerminated,

    #[error("engine index {index} out of range (capacity {capacity})")]
    EngineOutOfRange { index: EngineIndex, capacity: u32 },

    #[error("sparse iterator needs {levels} levels, at most {max} supported")]
    SparseIterTooDeep { levels: usize, max: usize },

    #[error("{what} capacity mismatch: expected {expected}, got {actual}")]
    StateMismatch { what: &'static str, expected: u32, actual: u32 },

    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),
}
