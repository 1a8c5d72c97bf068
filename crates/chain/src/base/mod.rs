//! Basic building blocks shared by every sub-process: character alphabets,
//! special functions, random draws and the token reader behind checkpoints.

pub mod alphabet;
pub mod random;
pub mod special;
pub mod tokens;

pub use alphabet::{Alphabet, UNKNOWN};
pub use tokens::TokenReader;
