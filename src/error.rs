//! Error taxonomy for the Audiality 2 engine.
//!
//! API-thread calls return these directly; engine-context failures (a voice
//! killed mid-callback, a driver hiccup) are instead posted through the
//! engine→API FIFO as `Message::Error` and logged at the site of failure.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A2Error {
    // Memory / resources
    OutOfMemory,
    OutOfHandles,
    VoiceAlloc,
    VoiceNest,

    // Handle / type
    InvalidHandle,
    FreeHandle,
    DeadHandle,
    WrongType,
    Refuse,

    // VM
    Overload,
    IllegalOp,
    DivByZero,
    BadEntry,
    ManyArgs,
    LateMessage,
    BadRegister,
    BadJump,
    StackOverflow,

    // Voice structure
    IoDontMatch,
    FewChannels,
    NoInput,
    NoOutput,
    NoUnits,
    NoXInsert,
    ChainMismatch,
    MultiInline,

    // Stream / IO
    BufOverflow,
    BufUnderflow,
    StreamClosed,
    WrongFormat,
    ReadOnly,
    WriteOnly,

    // Driver / device
    DeviceOpen,
    NoDriver,
    DriverNotFound,

    // Compiler (enumerated, not handled by this crate's minimal parser)
    ParseError,
    NotImplemented,
}

impl A2Error {
    /// Stable human-readable string, mirroring the original `A2_DEFERR`
    /// table so logs and `toapi` error reports read the same regardless of
    /// which context raised the error.
    pub const fn message(self) -> &'static str {
        use A2Error::*;
        match self {
            OutOfMemory => "out of memory",
            OutOfHandles => "out of handles",
            VoiceAlloc => "could not allocate voice",
            VoiceNest => "subvoice nesting depth exceeded",
            InvalidHandle => "invalid handle",
            FreeHandle => "handle already returned to the free pool",
            DeadHandle => "released (not locked) handle used by API",
            WrongType => "wrong type of data or object",
            Refuse => "destruction refused",
            Overload => "VM overload; too many instructions back-to-back",
            IllegalOp => "illegal VM opcode",
            DivByZero => "division by zero",
            BadEntry => "invalid program entry point",
            ManyArgs => "too many arguments to VM program",
            LateMessage => "API message arrived late to engine context",
            BadRegister => "invalid VM register index",
            BadJump => "illegal jump target position",
            StackOverflow => "VM call stack overflow",
            IoDontMatch => "input and output counts don't match",
            FewChannels => "voice has too few channels for unit",
            NoInput => "tried to read from a unit with no inputs",
            NoOutput => "tried to wire inputs to voice output bus",
            NoUnits => "voice program declares no units",
            NoXInsert => "no 'xinsert' unit found in voice structure",
            ChainMismatch => "unit chain wiring is inconsistent",
            MultiInline => "more than one inline unit in voice structure",
            BufOverflow => "buffer overflow",
            BufUnderflow => "buffer underflow",
            StreamClosed => "stream closed by the other party",
            WrongFormat => "wrong stream data format",
            ReadOnly => "object is read-only",
            WriteOnly => "object is write-only",
            DeviceOpen => "error opening device",
            NoDriver => "no driver of the required type available",
            DriverNotFound => "specified driver not found",
            ParseError => "source parse error",
            NotImplemented => "operation or feature not implemented",
        }
    }

    /// Whether this error, raised inside a running voice, should kill just
    /// that voice. `Overload` is always fatal to the voice; most VM errors are
    /// too. Resource/handle errors propagate to the caller instead and
    /// don't by themselves kill anything.
    pub const fn kills_voice(self) -> bool {
        use A2Error::*;
        matches!(
            self,
            Overload
                | IllegalOp
                | DivByZero
                | BadEntry
                | ManyArgs
                | BadRegister
                | BadJump
                | StackOverflow
                | VoiceNest
        )
    }
}

impl fmt::Display for A2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for A2Error {}

pub type A2Result<T> = Result<T, A2Error>;
