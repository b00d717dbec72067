//! Deterministic canonicalisation of raw place names.
//!
//! The normalised form is the lookup key for aliases and regions, so
//! [`normalize`] is pure and total: identical input always yields an
//! identical key. Steps, in order:
//!
//! 1. repair double-encoded UTF-8 (UTF-8 bytes read back as Latin-1 or
//!    Windows-1252) through the fixed [`CORRUPTION_TABLE`];
//! 2. trim;
//! 3. case-fold;
//! 4. strip accents (NFD decomposition, combining marks dropped, ligatures
//!    expanded);
//! 5. collapse every run of whitespace and punctuation into one space.
//!
//! Repair runs first because the corruption signatures are only recognisable
//! before case folding and accent stripping rewrite them.

use std::borrow::Cow;

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

// ─── Corruption table ────────────────────────────────────────────────────────

/// Known corrupted → correct pairs. Multi-character sequences are listed
/// before any sequence they contain.
pub const CORRUPTION_TABLE: &[(&str, &str)] = &[
  // Windows-1252 punctuation (three-byte sequences).
  ("\u{e2}\u{20ac}\u{2122}", "\u{2019}"), // â€™ → ’
  ("\u{e2}\u{20ac}\u{2dc}", "\u{2018}"),  // â€˜ → ‘
  ("\u{e2}\u{20ac}\u{201c}", "\u{2013}"), // â€“ → –
  ("\u{e2}\u{20ac}\u{201d}", "\u{2014}"), // â€” → —
  // Lower-case Latin letters.
  ("\u{c3}\u{a4}", "ä"),
  ("\u{c3}\u{b6}", "ö"),
  ("\u{c3}\u{bc}", "ü"),
  ("\u{c3}\u{a9}", "é"),
  ("\u{c3}\u{a8}", "è"),
  ("\u{c3}\u{aa}", "ê"),
  ("\u{c3}\u{ab}", "ë"),
  ("\u{c3}\u{a0}", "à"),
  ("\u{c3}\u{a2}", "â"),
  ("\u{c3}\u{a1}", "á"),
  ("\u{c3}\u{a7}", "ç"),
  ("\u{c3}\u{b4}", "ô"),
  ("\u{c3}\u{b3}", "ó"),
  ("\u{c3}\u{ae}", "î"),
  ("\u{c3}\u{af}", "ï"),
  ("\u{c3}\u{ad}", "í"),
  ("\u{c3}\u{b9}", "ù"),
  ("\u{c3}\u{bb}", "û"),
  ("\u{c3}\u{ba}", "ú"),
  ("\u{c3}\u{b1}", "ñ"),
  // Upper-case letters whose second byte lands in the Windows-1252 range.
  ("\u{c3}\u{201e}", "Ä"),
  ("\u{c3}\u{2013}", "Ö"),
  ("\u{c3}\u{153}", "Ü"),
  ("\u{c3}\u{2030}", "É"),
  ("\u{c3}\u{2c6}", "È"),
  ("\u{c3}\u{20ac}", "À"),
  ("\u{c3}\u{178}", "ß"),
  // The same letters when the bytes were read as strict Latin-1.
  ("\u{c3}\u{84}", "Ä"),
  ("\u{c3}\u{96}", "Ö"),
  ("\u{c3}\u{9c}", "Ü"),
  ("\u{c3}\u{89}", "É"),
  ("\u{c3}\u{88}", "È"),
  ("\u{c3}\u{80}", "À"),
  ("\u{c3}\u{9f}", "ß"),
  // Non-breaking space.
  ("\u{c2}\u{a0}", " "),
];

/// Characters a Windows-1252 decoder produces for bytes 0x80–0x9F.
const CP1252_HIGH: &[char] = &[
  '\u{20ac}', '\u{201a}', '\u{192}', '\u{201e}', '\u{2026}', '\u{2020}',
  '\u{2021}', '\u{2c6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}',
  '\u{17d}', '\u{2018}', '\u{2019}', '\u{201c}', '\u{201d}', '\u{2022}',
  '\u{2013}', '\u{2014}', '\u{2dc}', '\u{2122}', '\u{161}', '\u{203a}',
  '\u{153}', '\u{17e}', '\u{178}',
];

/// Replace every known corrupted sequence with its correct form.
///
/// Returns [`Cow::Borrowed`] when nothing matched.
pub fn repair_encoding(raw: &str) -> Cow<'_, str> {
  let mut out: Cow<'_, str> = Cow::Borrowed(raw);
  for (corrupted, correct) in CORRUPTION_TABLE {
    if out.contains(corrupted) {
      out = Cow::Owned(out.replace(corrupted, correct));
    }
  }
  out
}

/// Whether `s` still contains a double-encoding signature: a UTF-8 lead
/// byte rendered as `Ã`, `Â` or `â` followed by a continuation byte rendered
/// as Latin-1 or Windows-1252.
pub fn has_corruption_signature(s: &str) -> bool {
  let mut chars = s.chars().peekable();
  while let Some(c) = chars.next() {
    if !matches!(c, '\u{c3}' | '\u{c2}' | '\u{e2}') {
      continue;
    }
    if let Some(&next) = chars.peek()
      && (('\u{80}'..='\u{bf}').contains(&next) || CP1252_HIGH.contains(&next))
    {
      return true;
    }
  }
  false
}

// ─── Normalisation ───────────────────────────────────────────────────────────

/// The outcome of normalising one raw name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
  /// The lookup key.
  pub key:                   String,
  /// At least one entry of [`CORRUPTION_TABLE`] was applied.
  pub repaired:              bool,
  /// A corruption signature survived repair; the caller should flag the name.
  pub unrepaired_corruption: bool,
}

/// Normalise `raw` into its lookup key.
pub fn normalize(raw: &str) -> String { normalize_report(raw).key }

/// Normalise `raw` and report what the repair step did.
pub fn normalize_report(raw: &str) -> Normalized {
  let repaired = repair_encoding(raw);
  let was_repaired = matches!(repaired, Cow::Owned(_));
  let unrepaired_corruption = has_corruption_signature(&repaired);

  let folded = repaired.trim().to_lowercase();
  let key = collapse_separators(&strip_accents(&folded));

  Normalized { key, repaired: was_repaired, unrepaired_corruption }
}

/// A human-facing rendering of `raw`: encoding repaired, whitespace trimmed
/// and collapsed, case and accents preserved.
pub fn display_form(raw: &str) -> String {
  repair_encoding(raw)
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

fn strip_accents(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.nfd() {
    if is_combining_mark(c) {
      continue;
    }
    match c {
      'ß' => out.push_str("ss"),
      'æ' => out.push_str("ae"),
      'œ' => out.push_str("oe"),
      'ø' => out.push('o'),
      'đ' => out.push('d'),
      'ł' => out.push('l'),
      _ => out.push(c),
    }
  }
  out
}

fn collapse_separators(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut pending_separator = false;
  for c in s.chars() {
    if c.is_alphanumeric() {
      if pending_separator && !out.is_empty() {
        out.push(' ');
      }
      pending_separator = false;
      out.push(c);
    } else {
      pending_separator = true;
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn folds_case_and_accents() {
    assert_eq!(normalize("Zürich"), "zurich");
    assert_eq!(normalize("  ZURICH "), "zurich");
    assert_eq!(normalize("Genève"), "geneve");
    assert_eq!(normalize("Neuchâtel"), "neuchatel");
  }

  #[test]
  fn collapses_punctuation_and_whitespace() {
    assert_eq!(normalize("St. Gallen"), "st gallen");
    assert_eq!(normalize("Val-d'Illiez"), "val d illiez");
    assert_eq!(normalize("Basel  --  Stadt"), "basel stadt");
    assert_eq!(normalize("...Bern..."), "bern");
  }

  #[test]
  fn expands_ligatures_and_sharp_s() {
    assert_eq!(normalize("Straße"), "strasse");
    assert_eq!(normalize("Æbeltoft"), "aebeltoft");
  }

  #[test]
  fn repairs_double_encoded_names() {
    let report = normalize_report("ZÃ¼rich");
    assert_eq!(report.key, "zurich");
    assert!(report.repaired);
    assert!(!report.unrepaired_corruption);

    assert_eq!(normalize("GraubÃ¼nden"), "graubunden");
    assert_eq!(normalize("GenÃ¨ve"), "geneve");
    assert_eq!(display_form("BÃ¼lach"), "Bülach");
  }

  #[test]
  fn repairs_upper_case_windows_1252_sequences() {
    assert_eq!(repair_encoding("Ã–sterreich"), "Österreich");
    assert_eq!(repair_encoding("Ãœberlingen"), "Überlingen");
  }

  #[test]
  fn unknown_corruption_is_left_and_flagged() {
    let report = normalize_report("Z\u{c3}\u{bf}rich");
    assert!(!report.repaired);
    assert!(report.unrepaired_corruption);
  }

  #[test]
  fn clean_names_are_borrowed() {
    assert!(matches!(repair_encoding("Luzern"), Cow::Borrowed(_)));
    assert!(!has_corruption_signature("São Paulo"));
  }

  #[test]
  fn normalisation_is_deterministic() {
    for raw in ["Zürich", "ZÃ¼rich", "St. Moritz", "", "   "] {
      assert_eq!(normalize(raw), normalize(raw));
    }
    assert_eq!(normalize("   "), "");
  }

  #[test]
  fn display_form_keeps_case_and_accents() {
    assert_eq!(display_form("  Basel   Stadt "), "Basel Stadt");
    assert_eq!(display_form("Genève"), "Genève");
  }
}
