use core::fmt;

use serde::{Deserialize, Serialize};

/// Marker stored in place of a state index for gaps and ambiguity codes.
pub const UNKNOWN: u8 = u8::MAX;

const DNA_SYMBOLS: &[u8; 4] = b"ACGT";
const PROTEIN_SYMBOLS: &[u8; 20] = b"ACDEFGHIKLMNPQRSTVWY";

/// Character alphabet of an alignment.
///
/// States are indexed in the order of [`Alphabet::symbols`]; that order is
/// stable and used by profiles, counts and checkpoints alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alphabet {
    /// Nucleotides `ACGT` (`U` is read as `T`).
    Dna,
    /// The twenty amino acids.
    Protein,
}

impl Alphabet {
    /// Number of character states.
    #[inline(always)]
    pub const fn n_states(self) -> usize {
        match self {
            Self::Dna => 4,
            Self::Protein => 20,
        }
    }

    /// Uppercase symbols in state order.
    pub const fn symbols(self) -> &'static [u8] {
        match self {
            Self::Dna => DNA_SYMBOLS,
            Self::Protein => PROTEIN_SYMBOLS,
        }
    }

    /// Encode one ASCII character.
    ///
    /// Returns `Some(state)` for a resolved state, `Some(UNKNOWN)` for gaps
    /// and ambiguity codes, and `None` for characters outside the alphabet.
    pub fn encode(self, byte: u8) -> Option<u8> {
        let upper = byte.to_ascii_uppercase();
        if matches!(upper, b'-' | b'?' | b'.' | b'*' | b'X') {
            return Some(UNKNOWN);
        }
        match self {
            Self::Dna => match upper {
                b'A' => Some(0),
                b'C' => Some(1),
                b'G' => Some(2),
                b'T' | b'U' => Some(3),
                b'N' | b'R' | b'Y' | b'K' | b'M' | b'S' | b'W' | b'B' | b'D' | b'H' | b'V' => {
                    Some(UNKNOWN)
                }
                _ => None,
            },
            Self::Protein => {
                if matches!(upper, b'B' | b'Z' | b'J') {
                    return Some(UNKNOWN);
                }
                PROTEIN_SYMBOLS
                    .iter()
                    .position(|&s| s == upper)
                    .map(|i| i as u8)
            }
        }
    }

    /// Symbol of a state index, `'-'` for [`UNKNOWN`].
    pub fn symbol(self, state: u8) -> char {
        if state == UNKNOWN {
            return '-';
        }
        self.symbols()
            .get(state as usize)
            .map(|&b| b as char)
            .unwrap_or('?')
    }

    /// Guess the alphabet of a set of sequences: nucleotides if every
    /// character is a nucleotide, gap or `N`, amino acids otherwise.
    pub fn detect<'a>(sequences: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let is_dna = sequences.into_iter().all(|seq| {
            seq.iter().all(|b| {
                matches!(
                    b.to_ascii_uppercase(),
                    b'A' | b'C' | b'G' | b'T' | b'U' | b'N' | b'-' | b'?' | b'.'
                )
            })
        });
        if is_dna {
            Self::Dna
        } else {
            Self::Protein
        }
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dna => write!(f, "DNA"),
            Self::Protein => write!(f, "protein"),
        }
    }
}
