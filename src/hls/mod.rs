//! HLS playlist handling: a line-preserving model and the reference rewriter.

pub mod attributes;
pub mod playlist;
pub mod rewrite;

pub use playlist::{ParseError, Playlist, PlaylistBody};
pub use rewrite::{RewriteTargets, rewrite};
