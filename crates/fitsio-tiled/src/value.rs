use std::str;

/// A typed FITS header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// FITS logical value (`T` or `F`).
    Logical(bool),
    /// FITS integer value.
    Integer(i64),
    /// FITS floating-point value.
    Float(f64),
    /// FITS character string (content between single quotes).
    String(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value; integers widen to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }
}

/// Find a ` /` comment separator and return the trimmed comment after it.
///
/// Real-world writers sometimes omit the space after the slash, so only the
/// leading space is required.
fn find_comment(field: &[u8]) -> Option<(usize, &str)> {
    let at = field.windows(2).position(|w| w == b" /")?;
    let mut start = at + 2;
    if field.get(start) == Some(&b' ') {
        start += 1;
    }
    let comment = str::from_utf8(&field[start..]).ok()?.trim_end();
    Some((at, comment))
}

fn parse_string(field: &[u8]) -> Option<(Value, Option<&str>)> {
    let mut value = String::new();
    let mut i = 1;
    while i < field.len() {
        if field[i] == b'\'' {
            if field.get(i + 1) == Some(&b'\'') {
                value.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            break;
        }
        value.push(field[i] as char);
        i += 1;
    }
    // FITS pads strings to eight characters; trailing blanks are not significant.
    let trimmed = String::from(value.trim_end());
    let comment = find_comment(&field[i.min(field.len())..])
        .map(|(_, c)| c)
        .filter(|c| !c.is_empty());
    Some((Value::String(trimmed), comment))
}

/// Parse the 70-byte value field of a card (bytes 10..80).
///
/// Returns the parsed [`Value`] and an optional comment. The caller checks
/// the `= ` value indicator first.
pub fn parse_value(field: &[u8]) -> Option<(Value, Option<&str>)> {
    let first = field.iter().position(|&b| b != b' ')?;
    if field[first] == b'\'' {
        return parse_string(&field[first..]);
    }

    let (value_part, comment) = match find_comment(field) {
        Some((at, c)) => (&field[..at], Some(c).filter(|c| !c.is_empty())),
        None => (field, None),
    };
    let text = str::from_utf8(value_part).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    let value = match text {
        "T" => Value::Logical(true),
        "F" => Value::Logical(false),
        // Integers past i64 (the u64 BZERO offset) are kept as floats.
        _ if !text.contains(['.', 'E', 'e', 'D', 'd']) => match text.parse() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::Float(text.parse().ok()?),
        },
        _ => Value::Float(text.replace(['D', 'd'], "E").parse().ok()?),
    };
    Some((value, comment))
}

/// Serialize a [`Value`] into the 70-byte value field of a card.
///
/// Numbers and logicals are right-justified in the first 20 bytes (card
/// columns 11-30); strings start with a quote at byte 0.
pub fn format_value(value: &Value) -> [u8; 70] {
    let mut buf = [b' '; 70];
    match value {
        Value::Logical(b) => buf[19] = if *b { b'T' } else { b'F' },
        Value::Integer(n) => right_justify(format!("{n}").as_bytes(), &mut buf[..20]),
        Value::Float(f) => right_justify(format_float(*f).as_bytes(), &mut buf[..20]),
        Value::String(s) => write_string(s, &mut buf),
    }
    buf
}

fn right_justify(src: &[u8], dest: &mut [u8]) {
    let len = src.len().min(dest.len());
    let start = dest.len() - len;
    dest[start..].copy_from_slice(&src[..len]);
}

/// Shortest exponent form that fits 20 columns and still round-trips.
fn format_float(f: f64) -> String {
    if f == 0.0 {
        return String::from("0.0");
    }
    if !f.is_finite() {
        // No FITS literal for NaN or infinity.
        return String::from("0.0");
    }
    let shortest = format!("{f:E}");
    let shortest = match shortest.find('.') {
        Some(_) => shortest,
        None => shortest.replacen('E', ".0E", 1),
    };
    if shortest.len() <= 20 {
        return shortest;
    }
    let mut precision = 16usize;
    loop {
        let s = format!("{:.prec$E}", f, prec = precision);
        if s.len() <= 20 || precision == 0 {
            return s;
        }
        precision -= 1;
    }
}

fn write_string(s: &str, buf: &mut [u8; 70]) {
    buf[0] = b'\'';
    let mut pos = 1;
    for ch in s.bytes() {
        let needed = if ch == b'\'' { 2 } else { 1 };
        if pos + needed >= 69 {
            break;
        }
        buf[pos] = ch;
        if ch == b'\'' {
            buf[pos + 1] = b'\'';
        }
        pos += needed;
    }
    // Closing quote no earlier than column 20 of the card.
    pos = pos.max(9);
    buf[pos] = b'\'';
}
