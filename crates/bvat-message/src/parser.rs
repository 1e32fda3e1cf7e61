use bvat_frame::Record;

use crate::message::{
    Announced, ControlEvent, GeoPosition, Malformed, MalformedReason, Message, TelemetrySample,
};

/// Banner the firmware prints when the button starts a logging run.
pub const CONTROL_STARTED: &str = "=== Data Logging STARTED ===";

/// Banner the firmware prints when the button stops a logging run.
pub const CONTROL_STOPPED: &str = "=== Data Logging STOPPED ===";

/// Every sample line starts with this tag.
pub const SAMPLE_PREFIX: &str = "DATA,";

type Fields<'a> = Vec<(&'a str, &'a str)>;

/// Classify one record.
///
/// Sample grammar:
/// ```text
/// DATA, Accel(X: <f>, Y: <f>, Z: <f>), GPS(Fix: <u8>, Spd: <f>[, Lat: <f>, Lon: <f>])
/// ```
/// Control banners are matched anywhere in the line, so a button press survives
/// leading line noise.
pub fn parse_record(record: &Record) -> Message {
    let text = match std::str::from_utf8(&record.bytes) {
        Ok(text) => text,
        Err(_) => {
            return match announced_in(&record.text_lossy()) {
                Some(announced) => control(record, announced),
                None if record.bytes.trim_ascii_start().starts_with(SAMPLE_PREFIX.as_bytes()) => {
                    malformed(record, MalformedReason::BadEncoding)
                }
                None => malformed(record, MalformedReason::NotUtf8),
            };
        }
    };

    if let Some(announced) = announced_in(text) {
        return control(record, announced);
    }

    let text = text.trim();
    if !text.starts_with(SAMPLE_PREFIX) {
        return malformed(record, MalformedReason::Unrecognized);
    }

    match parse_sample(record, text) {
        Ok(sample) => Message::Sample(sample),
        Err(reason) => malformed(record, reason),
    }
}

fn announced_in(text: &str) -> Option<Announced> {
    if text.contains(CONTROL_STARTED) {
        Some(Announced::Started)
    } else if text.contains(CONTROL_STOPPED) {
        Some(Announced::Stopped)
    } else {
        None
    }
}

fn control(record: &Record, announced: Announced) -> Message {
    Message::Control(ControlEvent {
        seq: record.seq,
        received_at: record.received_at,
        announced,
    })
}

fn malformed(record: &Record, reason: MalformedReason) -> Message {
    Message::Malformed(Malformed {
        seq: record.seq,
        reason,
        bytes: record.bytes.clone(),
    })
}

fn parse_sample(record: &Record, text: &str) -> Result<TelemetrySample, MalformedReason> {
    let body = text[SAMPLE_PREFIX.len()..].trim_start();

    let (accel, rest) = group(body, "Accel")?;
    let rest = rest
        .trim_start()
        .strip_prefix(',')
        .ok_or(MalformedReason::Truncated)?
        .trim_start();
    let (gps, rest) = group(rest, "GPS")?;
    if !rest.trim().is_empty() {
        return Err(MalformedReason::TrailingData);
    }

    let accel = fields(accel)?;
    let gps = fields(gps)?;

    let position = match (
        optional_float(&gps, "Lat")?,
        optional_float(&gps, "Lon")?,
    ) {
        (Some(latitude), Some(longitude)) => Some(GeoPosition {
            latitude,
            longitude,
        }),
        (None, None) => None,
        _ => return Err(MalformedReason::IncompletePosition),
    };

    Ok(TelemetrySample {
        timestamp: record.received_at,
        accel_x: float(&accel, "X")?,
        accel_y: float(&accel, "Y")?,
        accel_z: float(&accel, "Z")?,
        gps_fix: lookup(&gps, "Fix")?
            .parse()
            .map_err(|_| MalformedReason::BadField("Fix"))?,
        speed_kmh: float(&gps, "Spd")?,
        position,
    })
}

/// Split `Name(inner)rest` into `(inner, rest)`.
fn group<'a>(text: &'a str, name: &'static str) -> Result<(&'a str, &'a str), MalformedReason> {
    let open = text
        .strip_prefix(name)
        .and_then(|after| after.trim_start().strip_prefix('('));
    let Some(open) = open else {
        return if text.is_empty() {
            Err(MalformedReason::Truncated)
        } else {
            Err(MalformedReason::MissingField(name))
        };
    };
    let close = open.find(')').ok_or(MalformedReason::Truncated)?;
    Ok((&open[..close], &open[close + 1..]))
}

fn fields(inner: &str) -> Result<Fields<'_>, MalformedReason> {
    inner
        .split(',')
        .map(|pair| {
            pair.split_once(':')
                .map(|(key, value)| (key.trim(), value.trim()))
                .ok_or(MalformedReason::Truncated)
        })
        .collect()
}

fn lookup<'a>(fields: &Fields<'a>, key: &'static str) -> Result<&'a str, MalformedReason> {
    fields
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .ok_or(MalformedReason::MissingField(key))
}

fn float(fields: &Fields<'_>, key: &'static str) -> Result<f64, MalformedReason> {
    parse_finite(lookup(fields, key)?, key)
}

fn optional_float(fields: &Fields<'_>, key: &'static str) -> Result<Option<f64>, MalformedReason> {
    match fields.iter().find(|(k, _)| *k == key) {
        Some((_, value)) => parse_finite(value, key).map(Some),
        None => Ok(None),
    }
}

fn parse_finite(value: &str, key: &'static str) -> Result<f64, MalformedReason> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(MalformedReason::BadField(key)),
    }
}

/// Render a sample the way the firmware transmits it (without the newline).
pub fn encode_sample_line(sample: &TelemetrySample) -> String {
    let mut line = format!(
        "{SAMPLE_PREFIX} Accel(X: {}, Y: {}, Z: {}), GPS(Fix: {}, Spd: {}",
        sample.accel_x, sample.accel_y, sample.accel_z, sample.gps_fix, sample.speed_kmh
    );
    if let Some(pos) = sample.position {
        line.push_str(&format!(", Lat: {}, Lon: {}", pos.latitude, pos.longitude));
    }
    line.push(')');
    line
}

/// Render a control banner (without the newline).
pub fn encode_control_line(announced: Announced) -> &'static str {
    match announced {
        Announced::Started => CONTROL_STARTED,
        Announced::Stopped => CONTROL_STOPPED,
    }
}
