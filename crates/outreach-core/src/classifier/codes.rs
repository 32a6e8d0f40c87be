//! Platform rejection code table

/// Coarse class of a platform rejection code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClass {
    /// Mandatory wait with the number of seconds embedded in the code
    Wait(u64),
    RateLimited,
    AccountRestricted,
    TargetUnreachable,
    TargetInvalid,
    /// The desired end state already holds (e.g. user already in the group)
    AlreadyDone,
    Transient,
    Unknown,
}

const WAIT_PREFIXES: &[&str] = &["FLOOD_WAIT_", "FLOOD_PREMIUM_WAIT_", "SLOWMODE_WAIT_"];

const RATE_LIMITED: &[&str] = &["PEER_FLOOD", "FLOOD", "TOO_MANY_REQUESTS", "429"];

const ACCOUNT_RESTRICTED: &[&str] = &[
    "AUTH_KEY_UNREGISTERED",
    "AUTH_KEY_INVALID",
    "AUTH_KEY_DUPLICATED",
    "SESSION_REVOKED",
    "SESSION_EXPIRED",
    "USER_DEACTIVATED",
    "USER_DEACTIVATED_BAN",
    "PHONE_NUMBER_BANNED",
    "USER_RESTRICTED",
    "CHAT_ADMIN_REQUIRED",
    "CHAT_WRITE_FORBIDDEN",
    "CREDENTIAL_UNAVAILABLE",
    "401",
    "403",
];

const TARGET_UNREACHABLE: &[&str] = &[
    "USER_PRIVACY_RESTRICTED",
    "USER_NOT_MUTUAL_CONTACT",
    "USER_CHANNELS_TOO_MUCH",
    "USER_KICKED",
    "USER_BANNED_IN_CHANNEL",
    "USER_IS_BLOCKED",
    "YOU_BLOCKED_USER",
    "PRIVACY_PREMIUM_REQUIRED",
];

const TARGET_INVALID: &[&str] = &[
    "USERNAME_INVALID",
    "USERNAME_NOT_OCCUPIED",
    "USER_ID_INVALID",
    "PEER_ID_INVALID",
    "INPUT_USER_DEACTIVATED",
    "USER_BOT",
    "404",
];

const ALREADY_DONE: &[&str] = &["USER_ALREADY_PARTICIPANT"];

const TRANSIENT: &[&str] = &[
    "TIMEOUT",
    "NETWORK_ERROR",
    "RPC_CALL_FAIL",
    "INTERNAL_SERVER_ERROR",
    "WORKER_BUSY_TOO_LONG_RETRY",
];

/// Classify a rejection code; matching ignores case and surrounding whitespace
pub fn lookup(code: &str) -> CodeClass {
    let code = code.trim().to_ascii_uppercase();

    for prefix in WAIT_PREFIXES {
        if let Some(seconds) = code.strip_prefix(prefix) {
            if let Ok(seconds) = seconds.parse::<u64>() {
                return CodeClass::Wait(seconds);
            }
        }
    }

    let tables: [(&[&str], CodeClass); 6] = [
        (RATE_LIMITED, CodeClass::RateLimited),
        (ACCOUNT_RESTRICTED, CodeClass::AccountRestricted),
        (TARGET_UNREACHABLE, CodeClass::TargetUnreachable),
        (TARGET_INVALID, CodeClass::TargetInvalid),
        (ALREADY_DONE, CodeClass::AlreadyDone),
        (TRANSIENT, CodeClass::Transient),
    ];
    for (codes, class) in tables {
        if codes.contains(&code.as_str()) {
            return class;
        }
    }

    CodeClass::Unknown
}
