//! DVR-IP numeric result codes.

use crate::error::{DvrError, Result};

pub const RET_OK: i32 = 100;

/// Meaning of one known `Ret` code. Several non-100 codes still indicate
/// success (partial search results, reboot-required, ...).
pub fn lookup(ret: i32) -> Option<(bool, &'static str)> {
    let entry = match ret {
        100 => (true, "OK"),
        101 => (false, "Unknown error"),
        102 => (false, "Invalid version"),
        103 => (false, "Invalid request"),
        104 => (false, "Already logged in"),
        105 => (false, "Not logged in"),
        106 => (false, "Wrong username or password"),
        107 => (false, "Access denied"),
        108 => (false, "Timed out"),
        109 => (false, "File not found"),
        110 => (true, "Complete search results"),
        111 => (true, "Partial search results"),
        112 => (false, "User already exists"),
        113 => (false, "User does not exist"),
        114 => (false, "Group already exists"),
        115 => (false, "Group does not exist"),
        117 => (false, "Invalid message"),
        118 => (false, "PTZ protocol not set"),
        119 => (true, "No search results"),
        120 => (false, "Disabled"),
        121 => (false, "Channel not connected"),
        150 => (true, "Reboot required"),
        203 => (false, "Wrong password"),
        204 => (false, "Wrong username"),
        205 => (false, "Locked out"),
        206 => (false, "Banned"),
        207 => (false, "Already logged in"),
        208 => (false, "Illegal value"),
        211 => (false, "Object does not exist"),
        212 => (false, "Account in use"),
        213 => (false, "Subset larger than superset"),
        214 => (false, "Illegal characters in password"),
        215 => (false, "Passwords do not match"),
        216 => (false, "Username reserved"),
        502 => (false, "Illegal command"),
        503 => (true, "Intercom turned on"),
        504 => (true, "Intercom turned off"),
        511 => (true, "Upgrade started"),
        512 => (false, "Upgrade not started"),
        513 => (false, "Invalid upgrade data"),
        514 => (true, "Upgrade successful"),
        515 => (false, "Upgrade failed"),
        521 => (false, "Reset failed"),
        522 => (true, "Reset successful--reboot required"),
        523 => (false, "Reset data invalid"),
        602 => (true, "Import successful--restart required"),
        603 => (true, "Import successful--reboot required"),
        604 => (false, "Configuration write failed"),
        605 => (false, "Unsupported feature in configuration"),
        606 => (false, "Configuration read failed"),
        607 => (false, "Configuration not found"),
        608 => (false, "Illegal configuration syntax"),
        _ => return None,
    };
    Some(entry)
}

/// Fail the calling operation unless the reply's `Ret` code indicates
/// success. Unknown codes produce the generic `Ret=<code>` reason.
pub fn ensure_success(op: &'static str, ret: i32) -> Result<()> {
    match lookup(ret) {
        Some((true, _)) => Ok(()),
        Some((false, message)) => Err(DvrError::CommandFailed {
            op,
            ret,
            reason: message.to_string(),
        }),
        None => Err(DvrError::CommandFailed {
            op,
            ret,
            reason: format!("Ret={ret}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_codes_pass() {
        assert_eq!(lookup(RET_OK), Some((true, "OK")));
        assert!(ensure_success("Login", RET_OK).is_ok());
        assert!(ensure_success("SetConfig", 150).is_ok());
        assert!(ensure_success("GetConfig", 119).is_ok());
    }

    #[test]
    fn known_failure_carries_its_message() {
        let err = ensure_success("GetConfig", 105).unwrap_err();
        assert_eq!(
            err.to_string(),
            "GetConfig command failed: Not logged in"
        );
    }

    #[test]
    fn unknown_code_is_generic() {
        let err = ensure_success("Login", 999).unwrap_err();
        assert_eq!(err.to_string(), "Login command failed: Ret=999");
    }
}
