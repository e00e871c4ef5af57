//! Route playlist references back through the relay.
//!
//! Every segment URI and every key URI is resolved against the URL the
//! playlist was requested from, then replaced with
//! `{path}?url={encoded absolute URL}`.

use super::attributes::AttributeValue;
use super::playlist::{
    EXT_X_I_FRAME_STREAM_INF, EXT_X_MEDIA, Line, ParseError, Playlist, PlaylistBody,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, info, warn};
use url::Url;

/// Characters left unescaped by JavaScript's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Relay routes that rewritten references point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTargets {
    pub segment_path: String,
    pub key_path: String,
    /// When set, nested playlists of a master playlist are routed here too.
    pub playlist_path: Option<String>,
}

/// How many references a rewrite replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub segments: usize,
    pub keys: usize,
    pub playlists: usize,
}

/// Build a relay URL carrying `target` in its `url` query parameter.
pub fn relay_url(path: &str, target: &Url) -> String {
    format!(
        "{}?url={}",
        path,
        utf8_percent_encode(target.as_str(), URI_COMPONENT)
    )
}

/// Resolve `uri` against `base` and wrap it in a relay URL.
///
/// Returns `None` when the reference cannot be resolved.
pub fn reroute(uri: &str, base: &Url, path: &str) -> Option<String> {
    match base.join(uri) {
        Ok(resolved) => Some(relay_url(path, &resolved)),
        Err(e) => {
            warn!("Leaving unresolvable URI '{}' untouched: {}", uri, e);
            None
        }
    }
}

/// Parse `text`, rewrite its references and serialize the result.
///
/// Nothing is returned on parse failure; callers never see a partially
/// rewritten document.
pub fn rewrite(
    text: &str,
    base: &Url,
    targets: &RewriteTargets,
) -> Result<(String, RewriteStats), ParseError> {
    let mut playlist = Playlist::parse(text)?;
    let stats = rewrite_playlist(&mut playlist, base, targets);
    info!(
        "Rewrote playlist from {}: {} segments, {} keys, {} nested playlists",
        base, stats.segments, stats.keys, stats.playlists
    );
    Ok((playlist.serialize(), stats))
}

/// Rewrite a parsed playlist in place.
pub fn rewrite_playlist(
    playlist: &mut Playlist,
    base: &Url,
    targets: &RewriteTargets,
) -> RewriteStats {
    let mut stats = RewriteStats::default();

    match &mut playlist.body {
        PlaylistBody::Media(media) => {
            for segment in &mut media.segments {
                if let Some(uri) = reroute(&segment.uri, base, &targets.segment_path) {
                    segment.uri = uri;
                    stats.segments += 1;
                }
            }

            for key in &mut media.keys {
                let Some(original) = key.uri() else {
                    continue;
                };
                if let Some(uri) = reroute(original, base, &targets.key_path) {
                    key.set_uri(uri);
                    stats.keys += 1;
                }
            }
        }
        PlaylistBody::Master(master) => {
            let Some(playlist_path) = &targets.playlist_path else {
                debug!("Master playlist passed through with nested URIs untouched");
                return stats;
            };

            for variant in &mut master.variants {
                if let Some(uri) = reroute(&variant.uri, base, playlist_path) {
                    variant.uri = uri;
                    stats.playlists += 1;
                }
            }

            let tag_lines = master
                .variants
                .iter_mut()
                .flat_map(|variant| variant.tags.iter_mut())
                .chain(playlist.trailer.iter_mut());
            for line in tag_lines {
                if let Line::Tag(tag) = line
                    && (tag.name == EXT_X_MEDIA || tag.name == EXT_X_I_FRAME_STREAM_INF)
                    && let Some(attributes) = tag.attributes_mut()
                    && let Some(original) = attributes.value("URI")
                    && let Some(uri) = reroute(original, base, playlist_path)
                {
                    attributes.set("URI", AttributeValue::Quoted(uri));
                    stats.playlists += 1;
                }
            }
        }
    }

    stats
}
