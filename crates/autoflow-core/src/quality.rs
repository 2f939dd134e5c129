//! Release quality parsing and requirement matching.
//!
//! A quality has two ordered components, resolution and source. Requirements
//! are space separated: `720p+`, `<1080p`, `720p-1080p`, `hdtv`, `webdl+ 1080p`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[serde(rename = "360p")]
    R360p,
    #[serde(rename = "480p")]
    R480p,
    #[serde(rename = "576p")]
    R576p,
    #[serde(rename = "720i")]
    R720i,
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080i")]
    R1080i,
    #[serde(rename = "1080p")]
    R1080p,
    #[serde(rename = "2160p")]
    R2160p,
}

impl Resolution {
    const ALL: [Resolution; 8] = [
        Resolution::R360p,
        Resolution::R480p,
        Resolution::R576p,
        Resolution::R720i,
        Resolution::R720p,
        Resolution::R1080i,
        Resolution::R1080p,
        Resolution::R2160p,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::R360p => "360p",
            Resolution::R480p => "480p",
            Resolution::R576p => "576p",
            Resolution::R720i => "720i",
            Resolution::R720p => "720p",
            Resolution::R1080i => "1080i",
            Resolution::R1080p => "1080p",
            Resolution::R2160p => "2160p",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "4k" | "uhd" => Some(Resolution::R2160p),
            "1920x1080" => Some(Resolution::R1080p),
            "1280x720" => Some(Resolution::R720p),
            t => Resolution::ALL.into_iter().find(|r| r.as_str() == t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cam,
    Ts,
    Dvdrip,
    Hdtv,
    Webrip,
    Webdl,
    Bluray,
    Remux,
}

impl Source {
    const ALL: [Source; 8] = [
        Source::Cam,
        Source::Ts,
        Source::Dvdrip,
        Source::Hdtv,
        Source::Webrip,
        Source::Webdl,
        Source::Bluray,
        Source::Remux,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Cam => "cam",
            Source::Ts => "ts",
            Source::Dvdrip => "dvdrip",
            Source::Hdtv => "hdtv",
            Source::Webrip => "webrip",
            Source::Webdl => "webdl",
            Source::Bluray => "bluray",
            Source::Remux => "remux",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "camrip" | "hdcam" => Some(Source::Cam),
            "telesync" | "hdts" => Some(Source::Ts),
            "dvd" => Some(Source::Dvdrip),
            "pdtv" | "dsr" => Some(Source::Hdtv),
            "web-dl" | "web" => Some(Source::Webdl),
            "web-rip" => Some(Source::Webrip),
            "blu-ray" | "bdrip" | "brrip" => Some(Source::Bluray),
            t => Source::ALL.into_iter().find(|s| s.as_str() == t),
        }
    }
}

/// Detected quality of a release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quality {
    pub resolution: Option<Resolution>,
    pub source: Option<Source>,
}

impl Quality {
    /// Detect quality tokens in a release title.
    pub fn from_title(title: &str) -> Self {
        let lowered = title.to_lowercase();
        let mut quality = Quality::default();
        for token in lowered.split(|c: char| !(c.is_alphanumeric() || c == '-')) {
            if quality.resolution.is_none() {
                quality.resolution = Resolution::parse(token);
            }
            if quality.source.is_none() {
                quality.source = Source::parse(token);
            }
        }
        quality
    }

    pub fn is_unknown(&self) -> bool {
        self.resolution.is_none() && self.source.is_none()
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.resolution, self.source) {
            (None, None) => write!(f, "unknown"),
            (Some(r), None) => write!(f, "{}", r.as_str()),
            (None, Some(s)) => write!(f, "{}", s.as_str()),
            (Some(r), Some(s)) => write!(f, "{} {}", r.as_str(), s.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound<T> {
    Exactly(T),
    AtLeast(T),
    Below(T),
    Between(T, T),
}

impl<T: Ord + Copy> Bound<T> {
    fn allows(&self, value: T) -> bool {
        match *self {
            Bound::Exactly(v) => value == v,
            Bound::AtLeast(v) => value >= v,
            Bound::Below(v) => value < v,
            Bound::Between(lo, hi) => value >= lo && value <= hi,
        }
    }

    fn parse(token: &str, parse: fn(&str) -> Option<T>) -> Option<Self> {
        if let Some(rest) = token.strip_prefix('<') {
            return parse(rest).map(Bound::Below);
        }
        if let Some(rest) = token.strip_suffix('+') {
            return parse(rest).map(Bound::AtLeast);
        }
        if let Some((lo, hi)) = token.split_once('-') {
            if let (Some(lo), Some(hi)) = (parse(lo), parse(hi)) {
                return Some(Bound::Between(lo.min(hi), lo.max(hi)));
            }
        }
        parse(token).map(Bound::Exactly)
    }
}

/// A quality requirement such as `720p+ hdtv-bluray`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirement {
    resolution: Option<Bound<Resolution>>,
    source: Option<Bound<Source>>,
}

impl Requirement {
    /// Whether `quality` satisfies every component. Unknown components of the
    /// quality fail a constrained component.
    pub fn allows(&self, quality: &Quality) -> bool {
        let res_ok = match (self.resolution, quality.resolution) {
            (None, _) => true,
            (Some(b), Some(r)) => b.allows(r),
            (Some(_), None) => false,
        };
        let src_ok = match (self.source, quality.source) {
            (None, _) => true,
            (Some(b), Some(s)) => b.allows(s),
            (Some(_), None) => false,
        };
        res_ok && src_ok
    }

    pub fn is_any(&self) -> bool {
        self.resolution.is_none() && self.source.is_none()
    }
}

impl FromStr for Requirement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut req = Requirement::default();
        for token in s.to_lowercase().split_whitespace() {
            if token == "any" {
                continue;
            }
            if let Some(b) = Bound::parse(token, Resolution::parse) {
                if req.resolution.replace(b).is_some() {
                    return Err(format!("resolution given twice in '{s}'"));
                }
            } else if let Some(b) = Bound::parse(token, Source::parse) {
                if req.source.replace(b).is_some() {
                    return Err(format!("source given twice in '{s}'"));
                }
            } else {
                return Err(format!("'{token}' is not a valid quality"));
            }
        }
        Ok(req)
    }
}
