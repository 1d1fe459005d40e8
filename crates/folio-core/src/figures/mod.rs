//! Figures - 図版ライブラリと段落の対応付け

pub mod keywords;
pub mod matcher;

pub use self::matcher::{FigureMatcher, MatcherConfig};
