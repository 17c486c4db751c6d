//! Verse keys and audio URL builders.
//!
//! Recitation clips follow the per-ayah layout used by the everyayah mirrors:
//! `{base_url}/{surah:03}{ayah:03}.mp3`. Pronunciation clips for lesson words
//! are fetched from a text-to-speech endpoint.

use std::fmt;
use std::str::FromStr;

use crate::SourceId;

/// Number of ayat in each surah, indexed by surah number minus one.
const VERSE_COUNTS: [u16; 114] = [
    7, 286, 200, 176, 120, 165, 206, 75, 129, 109, 123, 111, 43, 52, 99, 128, 111, 110, 98, 135,
    112, 78, 118, 64, 77, 227, 93, 88, 69, 60, 34, 30, 73, 54, 45, 83, 182, 88, 75, 85, 54, 53,
    89, 59, 37, 35, 38, 29, 18, 45, 60, 49, 62, 55, 78, 96, 29, 22, 24, 13, 14, 11, 11, 18, 12,
    12, 30, 52, 52, 44, 28, 28, 20, 56, 40, 31, 50, 40, 46, 42, 29, 19, 36, 25, 22, 17, 19, 26,
    30, 20, 15, 21, 11, 8, 8, 19, 5, 8, 8, 11, 11, 8, 3, 9, 5, 4, 7, 3, 6, 3, 5, 4, 5, 6,
];

pub const SURAH_COUNT: u16 = 114;

pub const DEFAULT_RECITER: &str = "Alafasy_128kbps";
pub const DEFAULT_RECITER_URL: &str = "https://everyayah.com/data/Alafasy_128kbps";
pub const DEFAULT_PRONUNCIATION_URL: &str = "https://translate.google.com/translate_tts";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerseKeyError {
    #[error("Malformed verse key: {0:?}")]
    Malformed(String),

    #[error("Surah {0} does not exist")]
    UnknownSurah(u16),

    #[error("Surah {surah} has no ayah {ayah}")]
    UnknownAyah { surah: u16, ayah: u16 },
}

/// Number of ayat in `surah`, if it exists.
pub fn verse_count(surah: u16) -> Option<u16> {
    surah
        .checked_sub(1)
        .and_then(|i| VERSE_COUNTS.get(usize::from(i)))
        .copied()
}

/// A validated `surah:ayah` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VerseKey {
    surah: u16,
    ayah: u16,
}

impl VerseKey {
    pub fn new(surah: u16, ayah: u16) -> Result<Self, VerseKeyError> {
        let count = verse_count(surah).ok_or(VerseKeyError::UnknownSurah(surah))?;
        if ayah == 0 || ayah > count {
            return Err(VerseKeyError::UnknownAyah { surah, ayah });
        }
        Ok(Self { surah, ayah })
    }

    pub fn surah(&self) -> u16 {
        self.surah
    }

    pub fn ayah(&self) -> u16 {
        self.ayah
    }

    /// Position of the ayah in the whole mushaf, starting at 1.
    pub fn global_number(&self) -> u32 {
        let before: u32 = VERSE_COUNTS[..usize::from(self.surah - 1)]
            .iter()
            .map(|&c| u32::from(c))
            .sum();
        before + u32::from(self.ayah)
    }

    /// File name of the clip, e.g. `002255.mp3`.
    pub fn file_name(&self) -> String {
        format!("{:03}{:03}.mp3", self.surah, self.ayah)
    }

    /// All keys of `surah`, in order.
    pub fn surah_keys(surah: u16) -> Result<Vec<VerseKey>, VerseKeyError> {
        let count = verse_count(surah).ok_or(VerseKeyError::UnknownSurah(surah))?;
        Ok((1..=count).map(|ayah| VerseKey { surah, ayah }).collect())
    }
}

impl fmt::Display for VerseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.surah, self.ayah)
    }
}

impl FromStr for VerseKey {
    type Err = VerseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VerseKeyError::Malformed(s.to_string());
        let (surah, ayah) = s.trim().split_once(':').ok_or_else(malformed)?;
        let surah = surah.trim().parse::<u16>().map_err(|_| malformed())?;
        let ayah = ayah.trim().parse::<u16>().map_err(|_| malformed())?;
        VerseKey::new(surah, ayah)
    }
}

/// A reciter reachable through one or more mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reciter {
    name: String,
    base_urls: Vec<String>,
}

impl Reciter {
    /// Creates a reciter; trailing slashes and blank mirrors are dropped.
    pub fn new(name: impl Into<String>, base_urls: impl IntoIterator<Item = String>) -> Self {
        let base_urls = base_urls
            .into_iter()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .collect();
        Self {
            name: name.into(),
            base_urls,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }

    /// Candidate URLs of `key`, primary mirror first.
    pub fn verse_candidates(&self, key: VerseKey) -> Vec<SourceId> {
        let file = key.file_name();
        self.base_urls
            .iter()
            .map(|base| SourceId::from(format!("{base}/{file}")))
            .collect()
    }

    /// URL of `key` on the primary mirror.
    pub fn primary(&self, key: VerseKey) -> Option<SourceId> {
        self.verse_candidates(key).into_iter().next()
    }

    /// Primary URLs of every ayah of `surah`.
    pub fn surah_sources(&self, surah: u16) -> Result<Vec<SourceId>, VerseKeyError> {
        Ok(VerseKey::surah_keys(surah)?
            .into_iter()
            .filter_map(|key| self.primary(key))
            .collect())
    }

    /// Candidate lists of every ayah of `surah`, in the shape
    /// [`AutoAdvance::with_candidates`](crate::AutoAdvance::with_candidates) expects.
    pub fn surah_candidates(&self, surah: u16) -> Result<Vec<Vec<SourceId>>, VerseKeyError> {
        Ok(VerseKey::surah_keys(surah)?
            .into_iter()
            .map(|key| self.verse_candidates(key))
            .collect())
    }
}

impl Default for Reciter {
    fn default() -> Self {
        Self::new(DEFAULT_RECITER, [DEFAULT_RECITER_URL.to_string()])
    }
}

/// Text-to-speech endpoint for lesson word pronunciation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pronunciation {
    base_url: String,
    language: String,
}

impl Pronunciation {
    pub fn new(base_url: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            language: language.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Clip URL pronouncing `text`.
    pub fn url(&self, text: &str) -> SourceId {
        SourceId::from(format!(
            "{}?ie=UTF-8&client=tw-ob&tl={}&q={}",
            self.base_url,
            urlencoding::encode(&self.language),
            urlencoding::encode(text.trim())
        ))
    }
}

impl Default for Pronunciation {
    fn default() -> Self {
        Self::new(DEFAULT_PRONUNCIATION_URL, "ar")
    }
}
