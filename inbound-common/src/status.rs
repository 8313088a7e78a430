use core::fmt::{self, Display, Formatter};

/// Reply codes understood by the response catalog.
///
/// Codes above 999 are compound keys: they select an alternative rendering of
/// a three digit code (e.g. the continuation form of a greeting) and never
/// appear on the wire themselves, see [`Status::wire`].
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug, Hash)]
pub enum Status {
    HelpHeader = 213,
    ServiceReady = 220,
    GoAhead = 2201,
    GoodBye = 221,
    Ok = 250,
    GreetingContinued = 2501,
    Greeting = 2502,
    ListItem = 2503,
    ListEnd = 2504,
    CannotVerify = 252,
    StartMailInput = 354,
    Unavailable = 421,
    MailboxBusy = 450,
    ActionUnavailable = 451,
    InsufficientStorage = 452,
    TlsUnavailable = 454,
    /// A 454 for a sender or message an extension turned away
    PolicyDeferred = 4541,
    Unrecognised = 500,
    InvalidParameters = 501,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
    ParameterNotImplemented = 504,
    BadAddress = 510,
    HostNotFound = 512,
    SizeExceeded = 523,
    PolicyRejected = 541,
    MailboxUnavailable = 550,
    ExceededStorage = 552,
    MailboxNameNotAllowed = 553,
    TransactionFailed = 554,
    Unknown(u32),
}

impl Status {
    /// The three digit code this status is sent as
    #[must_use]
    pub fn wire(self) -> u32 {
        let code = u32::from(self);

        if code > 999 { code / 10 } else { code }
    }

    /// Checks if the status is a positive completion (2xx)
    #[must_use]
    pub fn is_positive(self) -> bool {
        (200..300).contains(&self.wire())
    }

    /// Checks if the status is a permanent rejection
    #[must_use]
    pub fn is_permanent(self) -> bool {
        self.wire() >= 500
    }

    /// Checks if the status is a temporary rejection
    #[must_use]
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&self.wire())
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            213 => Self::HelpHeader,
            220 => Self::ServiceReady,
            2201 => Self::GoAhead,
            221 => Self::GoodBye,
            250 => Self::Ok,
            2501 => Self::GreetingContinued,
            2502 => Self::Greeting,
            2503 => Self::ListItem,
            2504 => Self::ListEnd,
            252 => Self::CannotVerify,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            450 => Self::MailboxBusy,
            451 => Self::ActionUnavailable,
            452 => Self::InsufficientStorage,
            454 => Self::TlsUnavailable,
            4541 => Self::PolicyDeferred,
            500 => Self::Unrecognised,
            501 => Self::InvalidParameters,
            502 => Self::NotImplemented,
            503 => Self::InvalidCommandSequence,
            504 => Self::ParameterNotImplemented,
            510 => Self::BadAddress,
            512 => Self::HostNotFound,
            523 => Self::SizeExceeded,
            541 => Self::PolicyRejected,
            550 => Self::MailboxUnavailable,
            552 => Self::ExceededStorage,
            553 => Self::MailboxNameNotAllowed,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::HelpHeader => 213,
            Status::ServiceReady => 220,
            Status::GoAhead => 2201,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::GreetingContinued => 2501,
            Status::Greeting => 2502,
            Status::ListItem => 2503,
            Status::ListEnd => 2504,
            Status::CannotVerify => 252,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::MailboxBusy => 450,
            Status::ActionUnavailable => 451,
            Status::InsufficientStorage => 452,
            Status::TlsUnavailable => 454,
            Status::PolicyDeferred => 4541,
            Status::Unrecognised => 500,
            Status::InvalidParameters => 501,
            Status::NotImplemented => 502,
            Status::InvalidCommandSequence => 503,
            Status::ParameterNotImplemented => 504,
            Status::BadAddress => 510,
            Status::HostNotFound => 512,
            Status::SizeExceeded => 523,
            Status::PolicyRejected => 541,
            Status::MailboxUnavailable => 550,
            Status::ExceededStorage => 552,
            Status::MailboxNameNotAllowed => 553,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", self.wire())
    }
}
