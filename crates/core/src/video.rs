//! Lecture video sources: direct media files versus embeddable hosted players.

use thiserror::Error;
use url::Url;

/// File extensions played by a native media element.
pub const DIRECT_MEDIA_EXTENSIONS: &[&str] =
    &["mp4", "webm", "ogg", "ogv", "mov", "m4v", "m3u8", "mp3"];

/// Saved positions this close to the end restart from the beginning.
pub const RESUME_TAIL_SECS: f64 = 5.0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VideoSourceError {
    #[error("video url is empty")]
    Empty,

    #[error("video url is not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported video url scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("{provider} link does not contain a video id")]
    MissingVideoId { provider: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Direct { url: String },
    YouTube { video_id: String },
    Vimeo { video_id: String },
    GoogleDrive { file_id: String },
    /// Any other page, shown in a generic iframe.
    Embed { url: String },
}

impl VideoSource {
    /// Decide how a lecture URL should be played.
    ///
    /// # Errors
    ///
    /// Returns `VideoSourceError` for blank, unparsable or non-http(s) URLs,
    /// and for provider links that carry no video id.
    pub fn classify(raw: &str) -> Result<Self, VideoSourceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(VideoSourceError::Empty);
        }
        let url = Url::parse(raw).map_err(|err| VideoSourceError::InvalidUrl(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(VideoSourceError::UnsupportedScheme(url.scheme().to_string()));
        }

        if has_direct_extension(&url) {
            return Ok(Self::Direct {
                url: url.to_string(),
            });
        }

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host = host
            .strip_prefix("www.")
            .or_else(|| host.strip_prefix("m."))
            .unwrap_or(&host);
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        match host {
            "youtube.com" | "music.youtube.com" | "youtube-nocookie.com" => {
                let id = match segments.as_slice() {
                    ["watch", ..] => query_param(&url, "v"),
                    ["embed" | "shorts" | "live" | "v", id, ..] => Some((*id).to_string()),
                    _ => None,
                };
                valid_id(id, "YouTube").map(|video_id| Self::YouTube { video_id })
            }
            "youtu.be" => valid_id(segments.first().map(|s| (*s).to_string()), "YouTube")
                .map(|video_id| Self::YouTube { video_id }),
            "vimeo.com" | "player.vimeo.com" => {
                let id = segments
                    .iter()
                    .rev()
                    .find(|seg| seg.chars().all(|c| c.is_ascii_digit()))
                    .map(|s| (*s).to_string());
                valid_id(id, "Vimeo").map(|video_id| Self::Vimeo { video_id })
            }
            "drive.google.com" | "docs.google.com" => {
                let id = match segments.as_slice() {
                    ["file", "d", id, ..] => Some((*id).to_string()),
                    _ => query_param(&url, "id"),
                };
                match id {
                    Some(id) => valid_id(Some(id), "Google Drive")
                        .map(|file_id| Self::GoogleDrive { file_id }),
                    // Docs, Slides and folders have no file preview; show the page itself.
                    None => Ok(Self::Embed {
                        url: url.to_string(),
                    }),
                }
            }
            _ => Ok(Self::Embed {
                url: url.to_string(),
            }),
        }
    }

    /// URL handed to the player, starting at `start_secs` where the provider
    /// supports it.
    #[must_use]
    pub fn embed_url(&self, start_secs: u32) -> String {
        match self {
            Self::Direct { url } if start_secs > 0 => match Url::parse(url) {
                Ok(mut parsed) => {
                    parsed.set_fragment(Some(&format!("t={start_secs}")));
                    parsed.to_string()
                }
                Err(_) => url.clone(),
            },
            Self::Direct { url } | Self::Embed { url } => url.clone(),
            Self::YouTube { video_id } if start_secs > 0 => {
                format!("https://www.youtube.com/embed/{video_id}?start={start_secs}")
            }
            Self::YouTube { video_id } => format!("https://www.youtube.com/embed/{video_id}"),
            Self::Vimeo { video_id } if start_secs > 0 => {
                format!("https://player.vimeo.com/video/{video_id}#t={start_secs}s")
            }
            Self::Vimeo { video_id } => format!("https://player.vimeo.com/video/{video_id}"),
            Self::GoogleDrive { file_id } => {
                format!("https://drive.google.com/file/d/{file_id}/preview")
            }
        }
    }

    /// Only direct media gets the portal's own transport controls.
    #[must_use]
    pub fn supports_native_controls(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }

    #[must_use]
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "direct",
            Self::YouTube { .. } => "youtube",
            Self::Vimeo { .. } => "vimeo",
            Self::GoogleDrive { .. } => "google-drive",
            Self::Embed { .. } => "embed",
        }
    }
}

fn has_direct_extension(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .is_some_and(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            DIRECT_MEDIA_EXTENSIONS.contains(&ext.as_str())
        })
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn valid_id(id: Option<String>, provider: &'static str) -> Result<String, VideoSourceError> {
    id.filter(|id| {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
    .ok_or(VideoSourceError::MissingVideoId { provider })
}

/// Where playback should start given the saved position.
///
/// Positions inside the last few seconds, past the end, or not finite
/// restart at zero.
#[must_use]
pub fn resume_position(saved_secs: Option<f64>, duration_secs: Option<f64>) -> f64 {
    let Some(saved) = saved_secs.filter(|s| s.is_finite() && *s > 0.0) else {
        return 0.0;
    };
    match duration_secs.filter(|d| d.is_finite() && *d > 0.0) {
        Some(duration) if saved >= duration - RESUME_TAIL_SECS => 0.0,
        _ => saved,
    }
}
