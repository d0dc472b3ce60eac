//! SMS wire codec.
//!
//! Packs a request tuple into a single `#`-separated text message of at most
//! 160 characters, and parses gateway replies. Everything here is a pure
//! function of its inputs; the transport lives in [`super::transport`].
//!
//! Wire shape, always five fields even when empty:
//!
//! ```text
//! CMD#ID#AMOUNT#USER#AUTH
//! ```
//!
//! Gateway replies come back as `OK#<id>#<k:v>...` or `ERR#<id>#<code>#<k:v>...`.

use crate::error::{BackhaulError, Result};
use crate::request::Request;

/// Hard ceiling of a single SMS in the GSM-7 alphabet.
pub const MAX_SMS_LEN: usize = 160;

const FIELD_SEP: char = '#';

/// Command dictionary: full name <-> single-letter wire form.
///
/// Extensible by convention; unknown commands pass through unchanged.
const COMMANDS: &[(&str, &str)] = &[
    ("TRANSFER", "T"),
    ("PAYMENT", "P"),
    ("BALANCE", "B"),
    ("DEPOSIT", "D"),
    ("WITHDRAWAL", "W"),
    ("VERIFY", "V"),
];

/// The structured tuple an SMS carries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SmsPayload {
    pub command: String,
    pub id: String,
    pub amount: Option<f64>,
    pub user: String,
    pub auth: String,
}

impl SmsPayload {
    /// Derive an SMS payload from a request's structured body.
    ///
    /// Key lookup is forgiving: `command`/`type`/`cmd` for the command
    /// (falling back to the last URL path segment), `id`/`reference` for the
    /// id, `user`/`account` for the user, `auth`/`token`/`pin` for the auth
    /// field. Missing keys encode as empty fields.
    pub fn from_request(request: &Request) -> Self {
        let lookup = |keys: &[&str]| -> String {
            request
                .body
                .as_ref()
                .and_then(|body| keys.iter().find_map(|key| body.get(*key)))
                .map(value_to_text)
                .unwrap_or_default()
        };

        let mut command = lookup(&["command", "type", "cmd"]);
        if command.is_empty() {
            command = last_path_segment(&request.url).to_ascii_uppercase();
        }

        let amount = request
            .body
            .as_ref()
            .and_then(|body| body.get("amount"))
            .and_then(numeric_value);

        SmsPayload {
            command,
            id: lookup(&["id", "reference"]),
            amount,
            user: lookup(&["user", "account"]),
            auth: lookup(&["auth", "token", "pin"]),
        }
    }
}

/// A parsed gateway reply.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayReply {
    /// `OK#<id>#<k:v>...` — the operation succeeded.
    Ack {
        id: String,
        fields: Vec<(String, String)>,
    },
    /// `ERR#<id>#<code>#<k:v>...` — the operation failed.
    Nack {
        id: String,
        code: String,
        fields: Vec<(String, String)>,
    },
    /// Anything else: treated as a success with the raw body.
    Raw { body: String },
}

impl GatewayReply {
    /// HTTP-equivalent status for the reply.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayReply::Ack { .. } | GatewayReply::Raw { .. } => 200,
            GatewayReply::Nack { .. } => 400,
        }
    }

    /// The referenced wire id, if the reply carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            GatewayReply::Ack { id, .. } | GatewayReply::Nack { id, .. } => Some(id),
            GatewayReply::Raw { .. } => None,
        }
    }
}

/// Encode a payload into its `CMD#ID#AMOUNT#USER#AUTH` wire form.
///
/// # Errors
/// Fails with [`BackhaulError::SmsTooLarge`] if the encoded text would
/// exceed [`MAX_SMS_LEN`] characters.
pub fn encode(payload: &SmsPayload) -> Result<String> {
    let text = format!(
        "{}{sep}{}{sep}{}{sep}{}{sep}{}",
        compress_command(&payload.command),
        compress_id(&payload.id),
        payload.amount.map(compress_amount).unwrap_or_default(),
        payload.user,
        payload.auth,
        sep = FIELD_SEP,
    );
    if text.chars().count() > MAX_SMS_LEN {
        return Err(BackhaulError::SmsTooLarge {
            length: text.chars().count(),
        });
    }
    Ok(text)
}

/// Decode a wire message back into a payload.
///
/// Never fails: missing fields decode as empty, and input without a single
/// separator yields a command-only payload.
pub fn decode(text: &str) -> SmsPayload {
    let mut fields = text.split(FIELD_SEP);
    let mut next = || fields.next().unwrap_or_default().to_string();
    SmsPayload {
        command: expand_command(&next()),
        id: next(),
        amount: expand_amount(&next()),
        user: next(),
        auth: next(),
    }
}

/// Parse a gateway reply body.
pub fn decode_reply(body: &str) -> GatewayReply {
    let mut fields = body.split(FIELD_SEP);
    match fields.next() {
        Some("OK") => GatewayReply::Ack {
            id: fields.next().unwrap_or_default().to_string(),
            fields: key_value_pairs(fields),
        },
        Some("ERR") => GatewayReply::Nack {
            id: fields.next().unwrap_or_default().to_string(),
            code: fields.next().unwrap_or_default().to_string(),
            fields: key_value_pairs(fields),
        },
        _ => GatewayReply::Raw {
            body: body.to_string(),
        },
    }
}

fn key_value_pairs<'a>(fields: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    fields
        .filter(|field| !field.is_empty())
        .map(|field| match field.split_once(':') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (field.to_string(), String::new()),
        })
        .collect()
}

/// Map a command to its wire letter. Case-insensitive; unknown commands pass
/// through unchanged.
pub fn compress_command(command: &str) -> String {
    let upper = command.to_ascii_uppercase();
    COMMANDS
        .iter()
        .find(|(full, _)| *full == upper)
        .map(|(_, short)| short.to_string())
        .unwrap_or_else(|| command.to_string())
}

/// Inverse of [`compress_command`]; unknown letters pass through unchanged.
pub fn expand_command(wire: &str) -> String {
    let upper = wire.to_ascii_uppercase();
    COMMANDS
        .iter()
        .find(|(_, short)| *short == upper)
        .map(|(full, _)| full.to_string())
        .unwrap_or_else(|| wire.to_string())
}

/// Compress an amount: millions as `<n>M`, thousands as `<n>K`, else the
/// integer string. Non-integer multiples keep one decimal digit.
pub fn compress_amount(amount: f64) -> String {
    if amount >= 1_000_000.0 {
        scaled(amount / 1_000_000.0, 'M')
    } else if amount >= 1_000.0 {
        scaled(amount / 1_000.0, 'K')
    } else {
        format!("{}", amount as i64)
    }
}

fn scaled(value: f64, suffix: char) -> String {
    if value.fract() == 0.0 {
        format!("{}{}", value as i64, suffix)
    } else {
        format!("{:.1}{}", value, suffix)
    }
}

/// Inverse of [`compress_amount`], to the precision the wire form kept.
/// Empty or non-numeric input yields `None`.
pub fn expand_amount(wire: &str) -> Option<f64> {
    if wire.is_empty() {
        return None;
    }
    let (digits, multiplier) = match wire.chars().last() {
        Some('M') | Some('m') => (&wire[..wire.len() - 1], 1_000_000.0),
        Some('K') | Some('k') => (&wire[..wire.len() - 1], 1_000.0),
        _ => (wire, 1.0),
    };
    digits.parse::<f64>().ok().map(|value| value * multiplier)
}

/// Compress an id. Ids shaped `^[A-Z]+[0-9]+$` become the first prefix
/// letter plus the last four digits; anything else keeps its last six
/// characters. Empty stays empty.
pub fn compress_id(id: &str) -> String {
    if id.is_empty() {
        return String::new();
    }
    let alpha_len = id.chars().take_while(|c| c.is_ascii_uppercase()).count();
    let digits = &id[alpha_len..];
    if alpha_len > 0 && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        let tail_start = digits.len().saturating_sub(4);
        format!("{}{}", &id[..1], &digits[tail_start..])
    } else {
        let chars: Vec<char> = id.chars().collect();
        let tail_start = chars.len().saturating_sub(6);
        chars[tail_start..].iter().collect()
    }
}

fn last_path_segment(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Body, Method};

    #[test]
    fn encodes_five_fields_even_when_empty() {
        let payload = SmsPayload {
            command: "TRANSFER".to_string(),
            ..SmsPayload::default()
        };
        assert_eq!(encode(&payload).unwrap(), "T####");
    }

    #[test]
    fn command_table_round_trips() {
        for (full, short) in COMMANDS {
            assert_eq!(compress_command(full), *short);
            assert_eq!(expand_command(short), *full);
        }
        // Case-insensitive on encode, unknown passthrough both ways.
        assert_eq!(compress_command("transfer"), "T");
        assert_eq!(compress_command("TOPUP"), "TOPUP");
        assert_eq!(expand_command("X"), "X");
    }

    #[test]
    fn amount_compression_table() {
        assert_eq!(compress_amount(500.0), "500");
        assert_eq!(compress_amount(1_000.0), "1K");
        assert_eq!(compress_amount(1_500.0), "1.5K");
        assert_eq!(compress_amount(50_000.0), "50K");
        assert_eq!(compress_amount(1_500_000.0), "1.5M");
        assert_eq!(compress_amount(2_000_000.0), "2M");
    }

    #[test]
    fn amount_round_trips_over_reference_values() {
        for amount in [500.0, 1_000.0, 1_500.0, 50_000.0, 1_500_000.0] {
            let wire = compress_amount(amount);
            assert_eq!(expand_amount(&wire), Some(amount), "wire {wire}");
        }
        assert_eq!(expand_amount(""), None);
        assert_eq!(expand_amount("abc"), None);
    }

    #[test]
    fn id_compression_rules() {
        assert_eq!(compress_id("TXN123456789"), "T6789");
        assert_eq!(compress_id("AB42"), "A42");
        assert_eq!(compress_id("order-20260802-17"), "802-17");
        assert_eq!(compress_id("ab12"), "ab12");
        assert_eq!(compress_id(""), "");
    }

    #[test]
    fn payload_round_trips_when_id_is_a_fixed_point() {
        for (full, _) in COMMANDS {
            let payload = SmsPayload {
                command: full.to_string(),
                id: "ref-42".to_string(),
                amount: Some(50_000.0),
                user: "alice".to_string(),
                auth: "9912".to_string(),
            };
            let wire = encode(&payload).unwrap();
            assert_eq!(decode(&wire), payload, "wire {wire}");
        }
    }

    #[test]
    fn length_boundary_is_exactly_160() {
        // Five fields plus four separators: pad the auth field to land the
        // total on the boundary.
        let fixed = "T#ref-42#5K#alice#";
        let payload = |auth_len: usize| SmsPayload {
            command: "TRANSFER".to_string(),
            id: "ref-42".to_string(),
            amount: Some(5_000.0),
            user: "alice".to_string(),
            auth: "x".repeat(auth_len),
        };

        let at_limit = payload(MAX_SMS_LEN - fixed.len());
        assert_eq!(encode(&at_limit).unwrap().len(), 160);

        let over_limit = payload(MAX_SMS_LEN - fixed.len() + 1);
        match encode(&over_limit) {
            Err(BackhaulError::SmsTooLarge { length }) => assert_eq!(length, 161),
            other => panic!("expected SmsTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn decode_never_fails_on_garbage() {
        let payload = decode("complete nonsense without separators");
        assert_eq!(payload.command, "complete nonsense without separators");
        assert_eq!(payload.id, "");
        assert_eq!(payload.amount, None);

        let partial = decode("T#abc123");
        assert_eq!(partial.command, "TRANSFER");
        assert_eq!(partial.id, "abc123");
        assert_eq!(partial.user, "");
    }

    #[test]
    fn gateway_reply_parsing() {
        match decode_reply("OK#T6789#bal:1200#fee:5") {
            GatewayReply::Ack { id, fields } => {
                assert_eq!(id, "T6789");
                assert_eq!(fields[0], ("bal".to_string(), "1200".to_string()));
                assert_eq!(fields[1], ("fee".to_string(), "5".to_string()));
            }
            other => panic!("expected Ack, got {:?}", other),
        }

        match decode_reply("ERR#T6789#INSUFFICIENT_FUNDS") {
            GatewayReply::Nack { id, code, .. } => {
                assert_eq!(id, "T6789");
                assert_eq!(code, "INSUFFICIENT_FUNDS");
            }
            other => panic!("expected Nack, got {:?}", other),
        }

        let raw = decode_reply("Your balance is 1200");
        assert_eq!(raw.status_code(), 200);
        assert_eq!(raw.id(), None);
    }

    #[test]
    fn payload_from_request_reads_body_and_url() {
        let mut body = Body::new();
        body.insert("amount".to_string(), serde_json::json!(5000));
        body.insert("user".to_string(), serde_json::json!("alice"));
        body.insert("auth".to_string(), serde_json::json!("9912"));
        body.insert("id".to_string(), serde_json::json!("TXN00442"));

        let request = Request::new(Method::Post, "https://api.example.com/transfer")
            .body(body)
            .sms_eligible(true);

        let payload = SmsPayload::from_request(&request);
        assert_eq!(payload.command, "TRANSFER");
        assert_eq!(payload.id, "TXN00442");
        assert_eq!(payload.amount, Some(5000.0));
        assert_eq!(payload.user, "alice");
        assert_eq!(payload.auth, "9912");

        assert_eq!(encode(&payload).unwrap(), "T#T0442#5K#alice#9912");
    }

    #[test]
    fn payload_command_falls_back_to_path_segment() {
        let request = Request::new(Method::Post, "https://api.example.com/t?x=1");
        let payload = SmsPayload::from_request(&request);
        assert_eq!(payload.command, "T");
        assert_eq!(payload.id, "");
        assert_eq!(payload.amount, None);
    }
}
