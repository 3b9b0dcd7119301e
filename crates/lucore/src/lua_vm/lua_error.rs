// Lightweight error channel.
//
// The Err side of every fallible runtime operation is a one-byte kind;
// the actual error object (any value) is parked on the faulting runtime
// (`LuaVM::error_value`) so Results stay small. Yield travels on the same
// channel: it is a status, not a failure.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Runtime error - error object stored in the VM
    Runtime,
    /// Malformed binary chunk / missing compiler
    Syntax,
    /// Allocation beyond the configured ceiling
    Memory,
    /// Error while running the error handler
    ErrErr,
    /// Coroutine yield - values parked on the yielding thread
    Yield,
}

pub type VmResult<T> = Result<T, VmError>;

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmError::Runtime => write!(f, "runtime error"),
            VmError::Syntax => write!(f, "syntax error"),
            VmError::Memory => write!(f, "not enough memory"),
            VmError::ErrErr => write!(f, "error in error handling"),
            VmError::Yield => write!(f, "yield"),
        }
    }
}

impl std::error::Error for VmError {}

/// Host-facing status codes, also used as coroutine error codes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Ok = 0,
    Yield = 1,
    Runtime = 2,
    Syntax = 3,
    Memory = 4,
    ErrErr = 5,
}

impl From<VmError> for ThreadStatus {
    fn from(e: VmError) -> Self {
        match e {
            VmError::Yield => ThreadStatus::Yield,
            VmError::Runtime => ThreadStatus::Runtime,
            VmError::Syntax => ThreadStatus::Syntax,
            VmError::Memory => ThreadStatus::Memory,
            VmError::ErrErr => ThreadStatus::ErrErr,
        }
    }
}

impl ThreadStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == ThreadStatus::Ok
    }
}

/// Error kind plus the rendered message, for hosts that want a single
/// `std::error::Error` value out of the runtime.
#[derive(Debug, Clone)]
pub struct FullError {
    pub kind: VmError,
    pub message: String,
}

impl std::fmt::Display for FullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for FullError {}
