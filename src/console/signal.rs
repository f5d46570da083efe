use serde::{Deserialize, Deserializer};
use std::fmt;

use super::reconcile::strip_timestamp;

pub const SIGNAL_PREFIX: &str = "Processing signal: ";

/// Bot prints strikes and prices either as JSON numbers or as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(value) => value,
            Scalar::Number(value) => value.to_string(),
            Scalar::Flag(value) => value.to_string(),
        }
    }
}

fn scalar<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(Scalar::into_string)
}

fn optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Scalar>::deserialize(deserializer).map(|value| value.map(Scalar::into_string))
}

/// Trading instruction echoed by the bot as `Processing signal: {json}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Signal {
    #[serde(deserialize_with = "scalar")]
    pub expiry: String,
    #[serde(rename = "lc_strike", deserialize_with = "scalar")]
    pub long_call_strike: String,
    #[serde(rename = "sc_strike", deserialize_with = "scalar")]
    pub short_call_strike: String,
    #[serde(deserialize_with = "scalar")]
    pub trigger_price: String,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub order_type: Option<String>,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Processing signal:")?;
        writeln!(f, "  • Expiry: {}", self.expiry)?;
        writeln!(f, "  • Long Call Strike: {}", self.long_call_strike)?;
        writeln!(f, "  • Short Call Strike: {}", self.short_call_strike)?;
        writeln!(f, "  • Trigger Price: {}", self.trigger_price)?;
        write!(
            f,
            "  • Order Type: {}",
            self.order_type.as_deref().unwrap_or("-")
        )
    }
}

/// Parses the signal payload of a log line. Anything malformed yields `None`.
pub fn parse_signal(line: &str) -> Option<Signal> {
    let payload = strip_timestamp(line).strip_prefix(SIGNAL_PREFIX)?;
    match serde_json::from_str::<Signal>(payload) {
        Ok(signal) => Some(signal),
        Err(err) => {
            log::debug!("[CONSOLE] unparseable signal payload: {}", err);
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayLine {
    Text(String),
    Signal(Signal),
}

impl fmt::Display for DisplayLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DisplayLine::Text(text) => f.write_str(text),
            DisplayLine::Signal(signal) => fmt::Display::fmt(signal, f),
        }
    }
}

/// Display form of a reconciled line: timestamp stripped, signals structured.
pub fn render_line(line: &str) -> DisplayLine {
    match parse_signal(line) {
        Some(signal) => DisplayLine::Signal(signal),
        None => DisplayLine::Text(strip_timestamp(line).to_string()),
    }
}
