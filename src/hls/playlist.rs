//! Line-preserving HLS playlist model.
//!
//! The parser keeps every line of the source document. Tags the relay needs
//! to understand (`#EXTINF`, `#EXT-X-KEY`, `#EXT-X-STREAM-INF`, and the
//! playlist-level integers) are decoded into typed fields. Everything else,
//! including vendor tags, comments and blank lines, is carried verbatim in its
//! original position, so serializing an untouched playlist reproduces the
//! input byte for byte.

use super::attributes::{AttributeList, AttributeListError, AttributeValue};
use std::fmt::{self, Write};
use thiserror::Error;
use tracing::debug;

/// Errors raised when a document is not a well-formed playlist.
///
/// Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("playlist is empty")]
    Empty,
    #[error("playlist does not start with #EXTM3U")]
    MissingHeader,
    #[error("line {line}: invalid {tag} value '{value}'")]
    InvalidNumber {
        line: usize,
        tag: &'static str,
        value: String,
    },
    #[error("line {line}: malformed attribute list in {tag}: {source}")]
    MalformedAttributes {
        line: usize,
        tag: &'static str,
        #[source]
        source: AttributeListError,
    },
    #[error("line {line}: EXT-X-KEY is missing the METHOD attribute")]
    KeyWithoutMethod { line: usize },
    #[error("line {line}: EXT-X-KEY with METHOD={method} requires a URI")]
    KeyWithoutUri { line: usize, method: String },
    #[error("line {line}: URI '{uri}' is not preceded by #EXTINF or #EXT-X-STREAM-INF")]
    OrphanUri { line: usize, uri: String },
    #[error("line {line}: {tag} is not followed by a URI")]
    MissingUri { line: usize, tag: &'static str },
    #[error("line {line}: playlist mixes media segment and variant stream tags")]
    MixedPlaylist { line: usize },
}

const EXTM3U: &str = "EXTM3U";
const EXTINF: &str = "EXTINF";
const EXT_X_KEY: &str = "EXT-X-KEY";
const EXT_X_VERSION: &str = "EXT-X-VERSION";
const EXT_X_TARGETDURATION: &str = "EXT-X-TARGETDURATION";
const EXT_X_MEDIA_SEQUENCE: &str = "EXT-X-MEDIA-SEQUENCE";
const EXT_X_PROGRAM_DATE_TIME: &str = "EXT-X-PROGRAM-DATE-TIME";
const EXT_X_STREAM_INF: &str = "EXT-X-STREAM-INF";
pub(crate) const EXT_X_MEDIA: &str = "EXT-X-MEDIA";
pub(crate) const EXT_X_I_FRAME_STREAM_INF: &str = "EXT-X-I-FRAME-STREAM-INF";

/// Tags that describe the playlist as a whole and may precede the first
/// segment or variant.
const PLAYLIST_LEVEL_TAGS: &[&str] = &[
    EXTM3U,
    EXT_X_VERSION,
    EXT_X_TARGETDURATION,
    EXT_X_MEDIA_SEQUENCE,
    "EXT-X-DISCONTINUITY-SEQUENCE",
    "EXT-X-PLAYLIST-TYPE",
    "EXT-X-I-FRAMES-ONLY",
    "EXT-X-INDEPENDENT-SEGMENTS",
    "EXT-X-START",
    "EXT-X-ALLOW-CACHE",
    "EXT-X-SERVER-CONTROL",
    "EXT-X-PART-INF",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// A parsed playlist document.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    /// `#EXT-X-VERSION`
    pub version: Option<u64>,
    /// `#EXT-X-TARGETDURATION`
    pub target_duration: Option<u64>,
    /// `#EXT-X-MEDIA-SEQUENCE`
    pub media_sequence: Option<u64>,
    /// Leading run of playlist-level tags, comments and blank lines.
    pub header: Vec<Line>,
    pub body: PlaylistBody,
    /// Lines after the last segment or variant URI (`#EXT-X-ENDLIST`, trailing
    /// vendor tags, ...).
    pub trailer: Vec<Line>,
    line_ending: LineEnding,
    trailing_newline: bool,
}

/// Media and master playlists share a header but not a body.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistBody {
    Media(MediaPlaylist),
    Master(MasterPlaylist),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPlaylist {
    pub segments: Vec<Segment>,
    /// Every `#EXT-X-KEY` in document order. Lines refer to these by index.
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterPlaylist {
    pub variants: Vec<Variant>,
}

/// One media segment: the tag lines leading up to its URI, and the URI.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration: f64,
    pub title: Option<String>,
    pub program_date_time: Option<String>,
    /// Index into [`MediaPlaylist::keys`] of the key in effect, if any.
    pub key: Option<usize>,
    pub tags: Vec<Line>,
}

/// A nested playlist reference from a master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub uri: String,
    pub bandwidth: Option<u64>,
    pub tags: Vec<Line>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMethod {
    None,
    Aes128,
    SampleAes,
    SampleAesCtr,
    Other(String),
}

impl KeyMethod {
    fn parse(value: &str) -> Self {
        match value {
            "NONE" => KeyMethod::None,
            "AES-128" => KeyMethod::Aes128,
            "SAMPLE-AES" => KeyMethod::SampleAes,
            "SAMPLE-AES-CTR" => KeyMethod::SampleAesCtr,
            other => KeyMethod::Other(other.to_string()),
        }
    }
}

/// An `#EXT-X-KEY` descriptor.
///
/// The typed accessors read from the ordered attribute list, which also holds
/// any attributes the relay does not know about.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub method: KeyMethod,
    attributes: AttributeList,
}

impl Key {
    pub fn uri(&self) -> Option<&str> {
        self.attributes.value("URI")
    }

    pub fn iv(&self) -> Option<&str> {
        self.attributes.value("IV")
    }

    pub fn key_format(&self) -> Option<&str> {
        self.attributes.value("KEYFORMAT")
    }

    pub fn key_format_versions(&self) -> Option<&str> {
        self.attributes.value("KEYFORMATVERSIONS")
    }

    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// Replace the key URI, keeping attribute order.
    pub fn set_uri(&mut self, uri: String) {
        self.attributes.set("URI", AttributeValue::Quoted(uri));
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", EXT_X_KEY, self.attributes)
    }
}

/// Any line that is not a segment or variant URI.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// Blank lines and `#` comments, exactly as read.
    Raw(String),
    Tag(Tag),
    /// Position of an `#EXT-X-KEY`; index into [`MediaPlaylist::keys`].
    Key(usize),
}

/// A `#NAME[:VALUE]` tag line.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub value: TagValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// No `:` after the name.
    Empty,
    Text(String),
    Attributes(AttributeList),
}

impl Tag {
    fn parse(line: &str) -> Self {
        let body = &line[1..];
        match body.split_once(':') {
            Some((name, value)) => Tag {
                name: name.to_string(),
                value: TagValue::Text(value.to_string()),
            },
            None => Tag {
                name: body.to_string(),
                value: TagValue::Empty,
            },
        }
    }

    fn text(&self) -> Option<&str> {
        match &self.value {
            TagValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn attributes_mut(&mut self) -> Option<&mut AttributeList> {
        match &mut self.value {
            TagValue::Attributes(list) => Some(list),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            TagValue::Empty => write!(f, "#{}", self.name),
            TagValue::Text(text) => write!(f, "#{}:{}", self.name, text),
            TagValue::Attributes(list) => write!(f, "#{}:{}", self.name, list),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Media,
    Master,
}

/// Segment-level state accumulated between two URI lines.
#[derive(Default)]
struct Pending {
    lines: Vec<Line>,
    inf: Option<(f64, Option<String>, usize)>,
    stream_inf: Option<(Option<u64>, usize)>,
    program_date_time: Option<String>,
}

impl Playlist {
    /// Parse a playlist document.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        if text.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut raw_lines: Vec<&str> = text.split('\n').collect();
        let trailing_newline = raw_lines.last() == Some(&"");
        if trailing_newline {
            raw_lines.pop();
        }
        let line_ending = if raw_lines.first().is_some_and(|l| l.ends_with('\r')) {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        };

        let first = raw_lines
            .first()
            .map(|l| l.trim_end_matches('\r'))
            .ok_or(ParseError::Empty)?;
        if first.trim_end() != "#EXTM3U" {
            return Err(ParseError::MissingHeader);
        }

        let mut playlist = Playlist {
            version: None,
            target_duration: None,
            media_sequence: None,
            header: Vec::new(),
            body: PlaylistBody::Media(MediaPlaylist::default()),
            trailer: Vec::new(),
            line_ending,
            trailing_newline,
        };
        let mut segments = Vec::new();
        let mut keys: Vec<Key> = Vec::new();
        let mut variants = Vec::new();
        let mut current_key: Option<usize> = None;
        let mut shape: Option<Shape> = None;
        let mut in_header = true;
        let mut pending = Pending::default();

        for (idx, raw) in raw_lines.iter().enumerate() {
            let line_no = idx + 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);

            if !line.starts_with("#EXT") {
                if line.trim().is_empty() || line.starts_with('#') {
                    let raw_line = Line::Raw(line.to_string());
                    if in_header {
                        playlist.header.push(raw_line);
                    } else {
                        pending.lines.push(raw_line);
                    }
                    continue;
                }

                in_header = false;
                let uri = line.to_string();
                let tags = std::mem::take(&mut pending.lines);
                if let Some((duration, title, _)) = pending.inf.take() {
                    segments.push(Segment {
                        uri,
                        duration,
                        title,
                        program_date_time: pending.program_date_time.take(),
                        key: current_key,
                        tags,
                    });
                } else if let Some((bandwidth, _)) = pending.stream_inf.take() {
                    variants.push(Variant {
                        uri,
                        bandwidth,
                        tags,
                    });
                } else {
                    return Err(ParseError::OrphanUri { line: line_no, uri });
                }
                continue;
            }

            let mut tag = Tag::parse(line);
            let name = tag.name.trim_end();

            if in_header && PLAYLIST_LEVEL_TAGS.contains(&name) {
                playlist.read_playlist_tag(&tag, line_no)?;
                playlist.header.push(Line::Tag(tag));
                continue;
            }
            in_header = false;

            match name {
                EXTINF => {
                    claim_shape(&mut shape, Shape::Media, line_no)?;
                    pending.inf = Some(parse_extinf(tag.text().unwrap_or(""), line_no)?);
                }
                EXT_X_PROGRAM_DATE_TIME => {
                    pending.program_date_time = tag.text().map(str::to_string);
                }
                EXT_X_KEY => {
                    claim_shape(&mut shape, Shape::Media, line_no)?;
                    let key = parse_key(tag.text().unwrap_or(""), line_no)?;
                    current_key = match key.method {
                        KeyMethod::None => None,
                        _ => Some(keys.len()),
                    };
                    pending.lines.push(Line::Key(keys.len()));
                    keys.push(key);
                    continue;
                }
                EXT_X_STREAM_INF => {
                    claim_shape(&mut shape, Shape::Master, line_no)?;
                    let attributes = parse_attributes(&tag, EXT_X_STREAM_INF, line_no)?;
                    let bandwidth = attributes
                        .value("BANDWIDTH")
                        .and_then(|b| b.parse().ok());
                    tag.value = TagValue::Attributes(attributes);
                    pending.stream_inf = Some((bandwidth, line_no));
                }
                EXT_X_MEDIA | EXT_X_I_FRAME_STREAM_INF => {
                    claim_shape(&mut shape, Shape::Master, line_no)?;
                    let tag_name = if name == EXT_X_MEDIA {
                        EXT_X_MEDIA
                    } else {
                        EXT_X_I_FRAME_STREAM_INF
                    };
                    tag.value = TagValue::Attributes(parse_attributes(&tag, tag_name, line_no)?);
                }
                _ => {
                    // Playlist-level tags are honoured wherever they appear.
                    playlist.read_playlist_tag(&tag, line_no)?;
                    debug!("Preserving tag #{} at line {}", tag.name, line_no);
                }
            }
            pending.lines.push(Line::Tag(tag));
        }

        if let Some((_, _, line)) = pending.inf {
            return Err(ParseError::MissingUri { line, tag: EXTINF });
        }
        if let Some((_, line)) = pending.stream_inf {
            return Err(ParseError::MissingUri {
                line,
                tag: EXT_X_STREAM_INF,
            });
        }

        playlist.trailer = pending.lines;
        playlist.body = match shape {
            Some(Shape::Master) => PlaylistBody::Master(MasterPlaylist { variants }),
            Some(Shape::Media) | None => PlaylistBody::Media(MediaPlaylist { segments, keys }),
        };

        Ok(playlist)
    }

    /// Record the typed value of a playlist-level integer tag (first wins).
    fn read_playlist_tag(&mut self, tag: &Tag, line: usize) -> Result<(), ParseError> {
        let (field, name) = match tag.name.as_str() {
            EXT_X_VERSION => (&mut self.version, EXT_X_VERSION),
            EXT_X_TARGETDURATION => (&mut self.target_duration, EXT_X_TARGETDURATION),
            EXT_X_MEDIA_SEQUENCE => (&mut self.media_sequence, EXT_X_MEDIA_SEQUENCE),
            _ => return Ok(()),
        };
        let value = tag.text().unwrap_or("");
        let parsed = value.trim().parse().map_err(|_| ParseError::InvalidNumber {
            line,
            tag: name,
            value: value.to_string(),
        })?;
        field.get_or_insert(parsed);
        Ok(())
    }

    pub fn is_master(&self) -> bool {
        matches!(self.body, PlaylistBody::Master(_))
    }

    /// Serialize back to text in the layout the document was parsed from.
    pub fn serialize(&self) -> String {
        let mut out = LineWriter::new(self.line_ending);
        let keys: &[Key] = match &self.body {
            PlaylistBody::Media(media) => &media.keys,
            PlaylistBody::Master(_) => &[],
        };

        out.lines(&self.header, keys);
        match &self.body {
            PlaylistBody::Media(media) => {
                for segment in &media.segments {
                    out.lines(&segment.tags, keys);
                    out.line(&segment.uri);
                }
            }
            PlaylistBody::Master(master) => {
                for variant in &master.variants {
                    out.lines(&variant.tags, keys);
                    out.line(&variant.uri);
                }
            }
        }
        out.lines(&self.trailer, keys);

        out.finish(self.trailing_newline)
    }
}

fn claim_shape(shape: &mut Option<Shape>, wanted: Shape, line: usize) -> Result<(), ParseError> {
    match shape {
        Some(existing) if *existing != wanted => Err(ParseError::MixedPlaylist { line }),
        _ => {
            *shape = Some(wanted);
            Ok(())
        }
    }
}

/// `#EXTINF:<duration>,[<title>]`
fn parse_extinf(value: &str, line: usize) -> Result<(f64, Option<String>, usize), ParseError> {
    let (duration, title) = match value.split_once(',') {
        Some((duration, title)) => (duration, Some(title).filter(|t| !t.is_empty())),
        None => (value, None),
    };
    let duration: f64 = duration
        .trim()
        .parse()
        .ok()
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| ParseError::InvalidNumber {
            line,
            tag: EXTINF,
            value: value.to_string(),
        })?;
    Ok((duration, title.map(str::to_string), line))
}

fn parse_key(value: &str, line: usize) -> Result<Key, ParseError> {
    let attributes = AttributeList::parse(value).map_err(|source| ParseError::MalformedAttributes {
        line,
        tag: EXT_X_KEY,
        source,
    })?;
    let method = attributes
        .value("METHOD")
        .map(KeyMethod::parse)
        .ok_or(ParseError::KeyWithoutMethod { line })?;

    if method != KeyMethod::None && attributes.get("URI").is_none() {
        return Err(ParseError::KeyWithoutUri {
            line,
            method: attributes.value("METHOD").unwrap_or_default().to_string(),
        });
    }

    Ok(Key { method, attributes })
}

fn parse_attributes(
    tag: &Tag,
    name: &'static str,
    line: usize,
) -> Result<AttributeList, ParseError> {
    AttributeList::parse(tag.text().unwrap_or("")).map_err(|source| {
        ParseError::MalformedAttributes {
            line,
            tag: name,
            source,
        }
    })
}

struct LineWriter {
    out: String,
    eol: &'static str,
    started: bool,
}

impl LineWriter {
    fn new(ending: LineEnding) -> Self {
        Self {
            out: String::with_capacity(4096),
            eol: ending.as_str(),
            started: false,
        }
    }

    fn line(&mut self, line: impl fmt::Display) {
        if self.started {
            self.out.push_str(self.eol);
        }
        self.started = true;
        let _ = write!(self.out, "{}", line);
    }

    fn lines(&mut self, lines: &[Line], keys: &[Key]) {
        for line in lines {
            match line {
                Line::Raw(raw) => self.line(raw),
                Line::Tag(tag) => self.line(tag),
                Line::Key(idx) => match keys.get(*idx) {
                    Some(key) => self.line(key),
                    None => debug!("Dropping dangling key reference {}", idx),
                },
            }
        }
    }

    fn finish(mut self, trailing_newline: bool) -> String {
        if trailing_newline {
            self.out.push_str(self.eol);
        }
        self.out
    }
}
