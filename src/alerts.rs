use std::io::Write;

use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub bell: bool,
    pub notification: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            bell: true,
            notification: true,
        }
    }
}

pub fn limit_message(limit_ms: u64) -> String {
    format!("Time limit of {} reached, stopwatch reset", stopwatch::format_hms_millis(limit_ms))
}

pub fn fire_alert(config: &AlertConfig, out: &mut impl Write, message: &str) {
    log::info!("{}", message);
    if config.bell {
        write!(out, "\x07").ok();
    }
    if config.notification {
        write!(out, "\r\n*** {} ***\r\n", message).ok();
    }
    out.flush().ok();
}
