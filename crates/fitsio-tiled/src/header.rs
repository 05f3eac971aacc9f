//! Ordered FITS header model with card parsing and writing.
//!
//! A [`Header`] never reorders its cards on its own. Callers choose the
//! position of every new card explicitly with [`Header::insert`], or append
//! with [`Header::push`].

use std::str;

use crate::block::{pad_to_block, BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE, HEADER_PAD_BYTE};
use crate::error::{Error, Result};
use crate::value::{format_value, parse_value, Value};

// ── Cards ──

/// One 80-byte header card.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// The 8-byte keyword name, ASCII, left-justified, space-padded.
    pub keyword: [u8; 8],
    /// The value, if the card has a value indicator (`= ` in bytes 8..10).
    pub value: Option<Value>,
    /// An optional comment string.
    pub comment: Option<String>,
}

/// Pad a keyword name to 8 bytes with trailing ASCII spaces.
pub fn keyword(name: &str) -> [u8; 8] {
    let mut k = [b' '; 8];
    let bytes = name.as_bytes();
    let len = bytes.len().min(8);
    k[..len].copy_from_slice(&bytes[..len]);
    k
}

/// Split an indexed keyword such as `NAXIS2` into `("NAXIS", 2)`.
///
/// Returns `None` when there is no numeric suffix, when the suffix has a
/// leading zero, or when nothing precedes it.
pub fn split_indexed(name: &str) -> Option<(&str, u32)> {
    let digits = name.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits == name.len() {
        return None;
    }
    let (stem, suffix) = name.split_at(name.len() - digits);
    if suffix.starts_with('0') {
        return None;
    }
    Some((stem, suffix.parse().ok()?))
}

impl Card {
    /// A valued card without a comment.
    pub fn new(name: &str, value: Value) -> Card {
        Card {
            keyword: keyword(name),
            value: Some(value),
            comment: None,
        }
    }

    /// Attach a comment.
    pub fn with_comment(mut self, comment: &str) -> Card {
        self.comment = Some(String::from(comment));
        self
    }

    /// A commentary card (`COMMENT`, `HISTORY` or blank) carrying free text.
    pub fn commentary(name: &str, text: &str) -> Card {
        Card {
            keyword: keyword(name),
            value: None,
            comment: if text.is_empty() {
                None
            } else {
                Some(String::from(text))
            },
        }
    }

    /// Return the keyword as a trimmed UTF-8 string.
    pub fn keyword_str(&self) -> &str {
        let end = self
            .keyword
            .iter()
            .rposition(|&b| b != b' ')
            .map(|i| i + 1)
            .unwrap_or(0);
        str::from_utf8(&self.keyword[..end]).unwrap_or("")
    }

    /// Returns `true` if this card is the END keyword.
    pub fn is_end(&self) -> bool {
        &self.keyword == b"END     "
    }

    /// Returns `true` for COMMENT, HISTORY and blank-keyword cards.
    pub fn is_commentary(&self) -> bool {
        matches!(&self.keyword, b"COMMENT " | b"HISTORY " | b"        ")
    }

    /// The same card under another keyword.
    pub fn renamed(&self, name: &str) -> Card {
        Card {
            keyword: keyword(name),
            value: self.value.clone(),
            comment: self.comment.clone(),
        }
    }
}

// ── Header ──

/// An ordered sequence of cards (without the END card).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
    duplicates: Vec<String>,
}

impl Header {
    pub fn new() -> Header {
        Header::default()
    }

    /// Build a header from cards in the given order, recording duplicates.
    pub fn from_cards(cards: Vec<Card>) -> Header {
        let mut header = Header::new();
        for card in cards {
            header.push(card);
        }
        header
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Card> {
        self.cards.iter()
    }

    /// Keywords that were inserted while a card with the same keyword was
    /// already present. Commentary cards are never duplicates.
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    /// Index of the first card with this keyword.
    pub fn position(&self, name: &str) -> Option<usize> {
        let key = keyword(name);
        self.cards.iter().position(|c| c.keyword == key)
    }

    pub fn get(&self, name: &str) -> Option<&Card> {
        self.position(name).map(|i| &self.cards[i])
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(|c| c.value.as_ref())
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(Value::as_int)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(Value::as_float)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_str).map(str::trim)
    }

    pub fn logical(&self, name: &str) -> Option<bool> {
        self.value(name).and_then(Value::as_bool)
    }

    /// Integer value of a mandatory keyword.
    pub fn require_int(&self, name: &str) -> Result<i64> {
        self.int(name)
            .ok_or_else(|| Error::MissingKeyword(String::from(name)))
    }

    /// String value of a mandatory keyword.
    pub fn require_string(&self, name: &str) -> Result<&str> {
        self.string(name)
            .ok_or_else(|| Error::MissingKeyword(String::from(name)))
    }

    /// All cards of an indexed family (`stem` followed by a number), sorted
    /// by index.
    pub fn indexed(&self, stem: &str) -> Vec<(u32, &Card)> {
        let mut family: Vec<(u32, &Card)> = self
            .cards
            .iter()
            .filter_map(|c| match split_indexed(c.keyword_str()) {
                Some((s, n)) if s == stem => Some((n, c)),
                _ => None,
            })
            .collect();
        family.sort_by_key(|(n, _)| *n);
        family
    }

    /// Insert `card` before position `index` (clamped to the end).
    ///
    /// Returns the position the card landed at.
    pub fn insert(&mut self, index: usize, card: Card) -> usize {
        if !card.is_commentary() && self.cards.iter().any(|c| c.keyword == card.keyword) {
            self.duplicates.push(String::from(card.keyword_str()));
        }
        let index = index.min(self.cards.len());
        self.cards.insert(index, card);
        index
    }

    /// Append `card` after the last card.
    pub fn push(&mut self, card: Card) -> usize {
        self.insert(self.cards.len(), card)
    }

    /// Replace the value and comment of an existing card in place, or append
    /// the card if its keyword is absent.
    pub fn set(&mut self, card: Card) -> usize {
        match self.cards.iter().position(|c| c.keyword == card.keyword) {
            Some(i) => {
                self.cards[i] = card;
                i
            }
            None => self.push(card),
        }
    }

    /// Remove the first card with this keyword.
    pub fn remove(&mut self, name: &str) -> Option<Card> {
        self.position(name).map(|i| self.cards.remove(i))
    }

    /// Parse header blocks until the END card.
    ///
    /// Returns the header and the number of bytes it occupied (a multiple of
    /// [`BLOCK_SIZE`]).
    pub fn parse(data: &[u8]) -> Result<(Header, usize)> {
        let mut header = Header::new();
        for (i, chunk) in data.chunks_exact(CARD_SIZE).enumerate() {
            let card_bytes: &[u8; CARD_SIZE] =
                chunk.try_into().map_err(|_| Error::InvalidHeader)?;
            let card = parse_card(card_bytes)?;
            if card.is_end() {
                let consumed = (i / CARDS_PER_BLOCK + 1) * BLOCK_SIZE;
                if consumed > data.len() {
                    return Err(Error::UnexpectedEof);
                }
                return Ok((header, consumed));
            }
            header.push(card);
        }
        Err(Error::UnexpectedEof)
    }

    /// Serialize into complete header blocks, END card included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity((self.cards.len() + 1) * CARD_SIZE);
        for card in &self.cards {
            buf.extend_from_slice(&format_card(card));
        }
        let mut end = [b' '; CARD_SIZE];
        end[..3].copy_from_slice(b"END");
        buf.extend_from_slice(&end);
        pad_to_block(&mut buf, 0, HEADER_PAD_BYTE);
        buf
    }
}

impl<'a> IntoIterator for &'a Header {
    type Item = &'a Card;
    type IntoIter = std::slice::Iter<'a, Card>;

    fn into_iter(self) -> Self::IntoIter {
        self.cards.iter()
    }
}

// ── Parsing ──

fn free_text(bytes: &[u8]) -> Result<Option<String>> {
    let text = str::from_utf8(bytes)
        .map_err(|_| Error::InvalidHeader)?
        .trim_end();
    Ok(if text.is_empty() {
        None
    } else {
        Some(String::from(text))
    })
}

/// Parse a single 80-byte card.
pub fn parse_card(card_bytes: &[u8; CARD_SIZE]) -> Result<Card> {
    let mut keyword = [b' '; 8];
    keyword.copy_from_slice(&card_bytes[..8]);

    if !keyword
        .iter()
        .all(|&b| matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b' ' | b'-' | b'_'))
    {
        return Err(Error::InvalidKeyword);
    }

    let mut card = Card {
        keyword,
        value: None,
        comment: None,
    };
    if card.is_end() {
        return Ok(card);
    }
    if card.is_commentary() || &card_bytes[8..10] != b"= " {
        card.comment = free_text(&card_bytes[8..])?;
        return Ok(card);
    }

    match parse_value(&card_bytes[10..]) {
        Some((value, comment)) => {
            card.value = Some(value);
            card.comment = comment.map(String::from);
        }
        None => {
            // Undefined value; keep a trailing comment if present.
            let field = str::from_utf8(&card_bytes[10..]).map_err(|_| Error::InvalidHeader)?;
            card.comment = field
                .find('/')
                .map(|i| field[i + 1..].trim())
                .filter(|c| !c.is_empty())
                .map(String::from);
        }
    }
    Ok(card)
}

// ── Writing ──

/// Serialize a [`Card`] into an 80-byte card image.
pub fn format_card(card: &Card) -> [u8; CARD_SIZE] {
    let mut buf = [b' '; CARD_SIZE];
    buf[..8].copy_from_slice(&card.keyword);

    match (&card.value, &card.comment) {
        (Some(value), comment) => {
            buf[8] = b'=';
            buf[9] = b' ';
            let mut field = format_value(value);
            if let Some(comment) = comment {
                insert_comment(&mut field, comment);
            }
            buf[10..].copy_from_slice(&field);
        }
        (None, Some(text)) => {
            let bytes = text.as_bytes();
            let len = bytes.len().min(72);
            buf[8..8 + len].copy_from_slice(&bytes[..len]);
        }
        (None, None) => {}
    }
    buf
}

/// Insert ` / comment` after the value in a 70-byte field.
fn insert_comment(field: &mut [u8; 70], comment: &str) {
    let content_end = if field[0] == b'\'' {
        let mut i = 1;
        while i < 70 {
            if field[i] == b'\'' {
                if i + 1 < 70 && field[i + 1] == b'\'' {
                    i += 2;
                    continue;
                }
                break;
            }
            i += 1;
        }
        (i + 1).max(20)
    } else {
        20
    };

    let sep = content_end + 1;
    if sep + 3 >= 70 {
        return;
    }
    field[sep] = b'/';
    let start = sep + 2;
    let bytes = comment.as_bytes();
    let len = bytes.len().min(70 - start);
    field[start..start + len].copy_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_card(text: &str) -> [u8; CARD_SIZE] {
        let mut buf = [b' '; CARD_SIZE];
        buf[..text.len()].copy_from_slice(text.as_bytes());
        buf
    }

    #[test]
    fn parse_integer_card() {
        let card = parse_card(&make_card("ZBITPIX =                  -32 / data type")).unwrap();
        assert_eq!(card.keyword_str(), "ZBITPIX");
        assert_eq!(card.value, Some(Value::Integer(-32)));
        assert_eq!(card.comment.as_deref(), Some("data type"));
    }

    #[test]
    fn parse_commentary_card() {
        let card = parse_card(&make_card("HISTORY compressed by fpack")).unwrap();
        assert!(card.is_commentary());
        assert!(card.value.is_none());
        assert_eq!(card.comment.as_deref(), Some("compressed by fpack"));
    }

    #[test]
    fn parse_rejects_lowercase_keyword() {
        assert!(matches!(
            parse_card(&make_card("zcmptype= 'RICE_1'")),
            Err(Error::InvalidKeyword)
        ));
    }

    #[test]
    fn format_then_parse_card() {
        let card = Card::new("ZCMPTYPE", Value::String("RICE_1".into()))
            .with_comment("compression algorithm");
        let bytes = format_card(&card);
        assert_eq!(&bytes[..10], b"ZCMPTYPE= ");
        assert_eq!(parse_card(&bytes).unwrap(), card);
    }

    #[test]
    fn split_indexed_keywords() {
        assert_eq!(split_indexed("NAXIS2"), Some(("NAXIS", 2)));
        assert_eq!(split_indexed("ZTILE12"), Some(("ZTILE", 12)));
        assert_eq!(split_indexed("NAXIS"), None);
        assert_eq!(split_indexed("123"), None);
        assert_eq!(split_indexed("TFORM01"), None);
    }

    #[test]
    fn indexed_family_sorted() {
        let header = Header::from_cards(vec![
            Card::new("ZNAXIS2", Value::Integer(20)),
            Card::new("ZNAXIS", Value::Integer(2)),
            Card::new("ZNAXIS1", Value::Integer(10)),
        ]);
        let family: Vec<(u32, i64)> = header
            .indexed("ZNAXIS")
            .into_iter()
            .map(|(n, c)| (n, c.value.as_ref().and_then(Value::as_int).unwrap()))
            .collect();
        assert_eq!(family, vec![(1, 10), (2, 20)]);
    }

    #[test]
    fn insert_at_explicit_position() {
        let mut header = Header::from_cards(vec![
            Card::new("A", Value::Integer(1)),
            Card::new("C", Value::Integer(3)),
        ]);
        assert_eq!(header.insert(1, Card::new("B", Value::Integer(2))), 1);
        assert_eq!(header.insert(99, Card::new("D", Value::Integer(4))), 3);
        let names: Vec<&str> = header.iter().map(Card::keyword_str).collect();
        assert_eq!(names, ["A", "B", "C", "D"]);
    }

    #[test]
    fn duplicates_are_tracked() {
        let mut header = Header::new();
        header.push(Card::new("OBJECT", Value::String("M31".into())));
        header.push(Card::commentary("COMMENT", "one"));
        header.push(Card::commentary("COMMENT", "two"));
        assert!(header.duplicates().is_empty());
        header.push(Card::new("OBJECT", Value::String("M33".into())));
        assert_eq!(header.duplicates(), ["OBJECT"]);
        assert_eq!(header.string("OBJECT"), Some("M31"));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut header = Header::from_cards(vec![
            Card::new("NAXIS1", Value::Integer(8)),
            Card::new("NAXIS2", Value::Integer(4)),
        ]);
        assert_eq!(header.set(Card::new("NAXIS1", Value::Integer(16))), 0);
        assert_eq!(header.int("NAXIS1"), Some(16));
        assert!(header.duplicates().is_empty());
    }

    #[test]
    fn require_reports_keyword() {
        let header = Header::new();
        match header.require_string("ZCMPTYPE") {
            Err(Error::MissingKeyword(kw)) => assert_eq!(kw, "ZCMPTYPE"),
            other => panic!("expected MissingKeyword, got {other:?}"),
        }
    }

    #[test]
    fn header_bytes_round_trip() {
        let mut header = Header::new();
        header.push(Card::new("XTENSION", Value::String("BINTABLE".into())));
        header.push(Card::new("ZIMAGE", Value::Logical(true)));
        header.push(Card::new("ZSCALE", Value::Float(0.25)).with_comment("step"));
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), BLOCK_SIZE);
        let (parsed, consumed) = Header::parse(&bytes).unwrap();
        assert_eq!(consumed, BLOCK_SIZE);
        assert_eq!(parsed, header);
    }

    #[test]
    fn parse_without_end_is_eof() {
        let bytes = vec![b' '; BLOCK_SIZE];
        assert!(matches!(Header::parse(&bytes), Err(Error::UnexpectedEof)));
    }
}
