//! Header keyword mapping between a plain HDU and its compressed form.
//!
//! Structural keywords of the original HDU are renamed when they are
//! backed up into the compressed header (`BITPIX` becomes `ZBITPIX`) and
//! renamed back on restore. Keywords that describe the compressed table or
//! the compression itself never cross over. Everything else is copied
//! unchanged in both directions.

use crate::header::{split_indexed, Card, Header};
use crate::value::Value;

/// Whether a mapping applies to one keyword or to a numbered family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordKind {
    Fixed,
    /// `stem` followed by an index, which is carried across the rename.
    Indexed,
}

/// What happens to a mapped keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingRule {
    /// Stored under `compressed`, restored under `plain`.
    Renamed,
    /// Describes the compressed table; written by the orchestrator only.
    Structural,
    /// Describes the compression; dropped on restore, suppressed on backup.
    CompressionParameter,
    /// Dropped on restore when its string value equals this one.
    DropIfValue(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEntry {
    pub plain: &'static str,
    pub compressed: &'static str,
    pub kind: KeywordKind,
    pub rule: MappingRule,
}

const fn renamed(plain: &'static str, compressed: &'static str, kind: KeywordKind) -> MappingEntry {
    MappingEntry {
        plain,
        compressed,
        kind,
        rule: MappingRule::Renamed,
    }
}

const fn fixed(name: &'static str, rule: MappingRule) -> MappingEntry {
    MappingEntry {
        plain: name,
        compressed: name,
        kind: KeywordKind::Fixed,
        rule,
    }
}

const fn indexed(stem: &'static str, rule: MappingRule) -> MappingEntry {
    MappingEntry {
        plain: stem,
        compressed: stem,
        kind: KeywordKind::Indexed,
        rule,
    }
}

use KeywordKind::{Fixed, Indexed};
use MappingRule::{CompressionParameter, Structural};

/// The complete mapping table.
pub static MAPPINGS: &[MappingEntry] = &[
    renamed("SIMPLE", "ZSIMPLE", Fixed),
    renamed("XTENSION", "ZTENSION", Fixed),
    renamed("BITPIX", "ZBITPIX", Fixed),
    renamed("NAXIS", "ZNAXIS", Fixed),
    renamed("NAXIS", "ZNAXIS", Indexed),
    renamed("PCOUNT", "ZPCOUNT", Fixed),
    renamed("GCOUNT", "ZGCOUNT", Fixed),
    renamed("EXTEND", "ZEXTEND", Fixed),
    renamed("BLOCKED", "ZBLOCKED", Fixed),
    renamed("CHECKSUM", "ZHECKSUM", Fixed),
    renamed("DATASUM", "ZDATASUM", Fixed),
    renamed("TFORM", "ZFORM", Indexed),
    fixed("TFIELDS", Structural),
    indexed("TTYPE", Structural),
    fixed("THEAP", Structural),
    fixed("ZIMAGE", CompressionParameter),
    fixed("ZCMPTYPE", CompressionParameter),
    fixed("ZQUANTIZ", CompressionParameter),
    fixed("ZDITHER0", CompressionParameter),
    indexed("ZTILE", CompressionParameter),
    indexed("ZNAME", CompressionParameter),
    indexed("ZVAL", CompressionParameter),
    fixed("ZMASKCMP", CompressionParameter),
    fixed("ZTABLE", CompressionParameter),
    fixed("ZTILELEN", CompressionParameter),
    indexed("ZCTYP", CompressionParameter),
    fixed("ZSCALE", CompressionParameter),
    fixed("ZZERO", CompressionParameter),
    fixed("ZBLANK", CompressionParameter),
    fixed("EXTNAME", MappingRule::DropIfValue("COMPRESSED_IMAGE")),
];

/// Find the entry whose `side` name matches `name`, with the index of an
/// indexed keyword.
fn lookup(name: &str, side: fn(&MappingEntry) -> &'static str) -> Option<(&'static MappingEntry, Option<u32>)> {
    if let Some(entry) = MAPPINGS.iter().find(|e| e.kind == Fixed && side(e) == name) {
        return Some((entry, None));
    }
    let (stem, n) = split_indexed(name)?;
    MAPPINGS
        .iter()
        .find(|e| e.kind == Indexed && side(e) == stem)
        .map(|e| (e, Some(n)))
}

/// Mapping entry for a keyword of the plain header.
pub fn lookup_plain(name: &str) -> Option<(&'static MappingEntry, Option<u32>)> {
    lookup(name, |e| e.plain)
}

/// Mapping entry for a keyword of the compressed header.
pub fn lookup_compressed(name: &str) -> Option<(&'static MappingEntry, Option<u32>)> {
    lookup(name, |e| e.compressed)
}

fn with_index(stem: &str, n: Option<u32>) -> String {
    match n {
        Some(n) => format!("{stem}{n}"),
        None => String::from(stem),
    }
}

/// Copy one card of a plain header into a compressed header at `index`.
///
/// Returns the position after the inserted card, or `index` when the card
/// was suppressed.
pub fn backup(card: &Card, header: &mut Header, index: usize) -> usize {
    match lookup_plain(card.keyword_str()) {
        Some((entry, n)) => match entry.rule {
            MappingRule::Renamed => header.insert(index, card.renamed(&with_index(entry.compressed, n))) + 1,
            Structural | CompressionParameter => {
                log::debug!("backup drops {}", card.keyword_str());
                index
            }
            MappingRule::DropIfValue(_) => header.insert(index, card.clone()) + 1,
        },
        None => header.insert(index, card.clone()) + 1,
    }
}

/// Copy one card of a compressed header into a plain header at `index`.
///
/// Returns the position after the inserted card, or `index` when the card
/// was dropped.
pub fn restore(card: &Card, header: &mut Header, index: usize) -> usize {
    let name = card.keyword_str();
    if let Some((entry, n)) = lookup_compressed(name) {
        return match entry.rule {
            MappingRule::Renamed => header.insert(index, card.renamed(&with_index(entry.plain, n))) + 1,
            Structural | CompressionParameter => index,
            MappingRule::DropIfValue(value) => {
                if card.value.as_ref().and_then(Value::as_str).map(str::trim) == Some(value) {
                    index
                } else {
                    header.insert(index, card.clone()) + 1
                }
            }
        };
    }
    // Plain names of renamed keywords describe the compressed table itself.
    if let Some((entry, _)) = lookup_plain(name) {
        if entry.rule == MappingRule::Renamed {
            return index;
        }
    }
    header.insert(index, card.clone()) + 1
}

/// Back up every card of `plain`, appending to `compressed`.
pub fn backup_header(plain: &Header, compressed: &mut Header) {
    let mut index = compressed.len();
    for card in plain {
        index = backup(card, compressed, index);
    }
}

/// Restore the original header from a compressed one.
pub fn restore_header(compressed: &Header) -> Header {
    let mut plain = Header::new();
    let mut index = 0;
    for card in compressed {
        index = restore(card, &mut plain, index);
    }
    plain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(name: &str, value: Value) -> Card {
        Card::new(name, value).with_comment("a comment")
    }

    #[test]
    fn renamed_keywords_round_trip() {
        let cards = vec![
            card("SIMPLE", Value::Logical(true)),
            card("XTENSION", Value::String("IMAGE".into())),
            card("BITPIX", Value::Integer(-32)),
            card("NAXIS", Value::Integer(2)),
            card("NAXIS1", Value::Integer(100)),
            card("NAXIS12", Value::Integer(3)),
            card("PCOUNT", Value::Integer(0)),
            card("GCOUNT", Value::Integer(1)),
            card("EXTEND", Value::Logical(true)),
            card("BLOCKED", Value::Logical(true)),
            card("CHECKSUM", Value::String("abc".into())),
            card("DATASUM", Value::String("123".into())),
            card("TFORM3", Value::String("1J".into())),
            card("OBJECT", Value::String("M31".into())),
        ];
        for original in cards {
            let mut compressed = Header::new();
            assert_eq!(backup(&original, &mut compressed, 0), 1);
            let stored = &compressed.cards()[0];
            let mut plain = Header::new();
            assert_eq!(restore(stored, &mut plain, 0), 1);
            assert_eq!(&plain.cards()[0], &original);
        }
    }

    #[test]
    fn backup_renames_with_index() {
        let mut compressed = Header::new();
        backup(&Card::new("NAXIS2", Value::Integer(7)), &mut compressed, 0);
        backup(&Card::new("TFORM11", Value::String("8A".into())), &mut compressed, 1);
        assert_eq!(compressed.int("ZNAXIS2"), Some(7));
        assert_eq!(compressed.string("ZFORM11"), Some("8A"));
    }

    #[test]
    fn compression_keywords_do_not_cross() {
        let mut compressed = Header::new();
        assert_eq!(backup(&Card::new("ZCMPTYPE", Value::String("RICE_1".into())), &mut compressed, 0), 0);
        assert_eq!(backup(&Card::new("TTYPE1", Value::String("FLUX".into())), &mut compressed, 0), 0);
        assert!(compressed.is_empty());

        let mut plain = Header::new();
        for c in [
            Card::new("ZIMAGE", Value::Logical(true)),
            Card::new("ZTILE1", Value::Integer(100)),
            Card::new("ZNAME1", Value::String("BLOCKSIZE".into())),
            Card::new("ZVAL1", Value::Integer(32)),
            Card::new("TFIELDS", Value::Integer(1)),
            Card::new("THEAP", Value::Integer(80)),
            Card::new("BITPIX", Value::Integer(8)),
            Card::new("NAXIS1", Value::Integer(8)),
            Card::new("TFORM1", Value::String("1PB".into())),
        ] {
            assert_eq!(restore(&c, &mut plain, 0), 0, "{}", c.keyword_str());
        }
        assert!(plain.is_empty());
    }

    #[test]
    fn extname_dropped_only_for_default_value() {
        let mut plain = Header::new();
        let default = Card::new("EXTNAME", Value::String("COMPRESSED_IMAGE".into()));
        assert_eq!(restore(&default, &mut plain, 0), 0);
        let named = Card::new("EXTNAME", Value::String("SCI".into()));
        assert_eq!(restore(&named, &mut plain, 0), 1);
        assert_eq!(plain.string("EXTNAME"), Some("SCI"));
    }

    #[test]
    fn whole_header_round_trip_keeps_order() {
        let original = Header::from_cards(vec![
            Card::new("SIMPLE", Value::Logical(true)),
            Card::new("BITPIX", Value::Integer(16)),
            Card::new("NAXIS", Value::Integer(2)),
            Card::new("NAXIS1", Value::Integer(10)),
            Card::new("NAXIS2", Value::Integer(20)),
            Card::new("EXPTIME", Value::Float(30.5)),
            Card::commentary("HISTORY", "taken at night"),
        ]);
        let mut compressed = Header::from_cards(vec![
            Card::new("XTENSION", Value::String("BINTABLE".into())),
            Card::new("BITPIX", Value::Integer(8)),
            Card::new("NAXIS", Value::Integer(2)),
            Card::new("ZIMAGE", Value::Logical(true)),
        ]);
        backup_header(&original, &mut compressed);
        assert_eq!(compressed.int("ZNAXIS2"), Some(20));
        assert_eq!(compressed.int("BITPIX"), Some(8));
        assert_eq!(restore_header(&compressed), original);
    }
}
