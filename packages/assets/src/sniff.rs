//! Content-type detection from magic bytes.
//!
//! Only the file's own bytes are consulted. Client filenames, declared
//! `Content-Type` headers and extensions never influence the result.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Number of leading bytes inspected.
pub const SNIFF_LEN: usize = 4100;

/// Top-level media category, also the first segment of every stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Application,
    Font,
    Model,
}

impl MediaKind {
    pub const ALL: [MediaKind; 6] = [
        MediaKind::Image,
        MediaKind::Video,
        MediaKind::Audio,
        MediaKind::Application,
        MediaKind::Font,
        MediaKind::Model,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Application => "application",
            MediaKind::Font => "font",
            MediaKind::Model => "model",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown media kind: {s}"))
    }
}

/// Result of a successful sniff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sniffed {
    pub mime: &'static str,
    pub extension: &'static str,
}

impl Sniffed {
    const fn new(mime: &'static str, extension: &'static str) -> Self {
        Self { mime, extension }
    }

    pub fn kind(&self) -> MediaKind {
        let top = self.mime.split('/').next().unwrap_or_default();
        top.parse().unwrap_or(MediaKind::Application)
    }
}

/// Identify `bytes` (a file prefix, ideally at least [`SNIFF_LEN`] long).
pub fn sniff(bytes: &[u8]) -> Option<Sniffed> {
    let b = bytes;

    if b.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(Sniffed::new("image/png", "png"));
    }
    if b.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(Sniffed::new("image/jpeg", "jpg"));
    }
    if b.starts_with(b"GIF87a") || b.starts_with(b"GIF89a") {
        return Some(Sniffed::new("image/gif", "gif"));
    }
    if b.starts_with(b"RIFF") && b.len() >= 12 {
        match &b[8..12] {
            b"WEBP" => return Some(Sniffed::new("image/webp", "webp")),
            b"WAVE" => return Some(Sniffed::new("audio/wav", "wav")),
            b"AVI " => return Some(Sniffed::new("video/vnd.avi", "avi")),
            _ => {}
        }
    }
    if b.starts_with(b"BM") && b.len() >= 14 && b[6..10] == [0, 0, 0, 0] {
        return Some(Sniffed::new("image/bmp", "bmp"));
    }
    if b.starts_with(&[0x00, 0x00, 0x01, 0x00]) && b.len() >= 6 && b[4] > 0 {
        return Some(Sniffed::new("image/x-icon", "ico"));
    }
    if b.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || b.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
        return Some(Sniffed::new("image/tiff", "tif"));
    }
    if let Some(sniffed) = sniff_iso_bmff(b) {
        return Some(sniffed);
    }
    if let Some(sniffed) = sniff_ebml(b) {
        return Some(sniffed);
    }
    if b.starts_with(b"FLV\x01") {
        return Some(Sniffed::new("video/x-flv", "flv"));
    }
    if b.starts_with(&[0x00, 0x00, 0x01, 0xBA]) || b.starts_with(&[0x00, 0x00, 0x01, 0xB3]) {
        return Some(Sniffed::new("video/mpeg", "mpg"));
    }
    if b.starts_with(b"ID3") || is_mpeg_audio_frame(b) {
        return Some(Sniffed::new("audio/mpeg", "mp3"));
    }
    if b.starts_with(b"OggS") {
        return Some(Sniffed::new("audio/ogg", "ogg"));
    }
    if b.starts_with(b"fLaC") {
        return Some(Sniffed::new("audio/x-flac", "flac"));
    }
    if b.starts_with(b"%PDF") {
        return Some(Sniffed::new("application/pdf", "pdf"));
    }
    if b.starts_with(&[0x50, 0x4B, 0x03, 0x04]) || b.starts_with(&[0x50, 0x4B, 0x05, 0x06]) {
        return Some(Sniffed::new("application/zip", "zip"));
    }
    if b.starts_with(&[0x1F, 0x8B, 0x08]) {
        return Some(Sniffed::new("application/gzip", "gz"));
    }
    if b.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
        return Some(Sniffed::new("application/x-7z-compressed", "7z"));
    }
    if b.starts_with(b"Rar!\x1A\x07") {
        return Some(Sniffed::new("application/x-rar-compressed", "rar"));
    }
    if b.len() >= 262 && &b[257..262] == b"ustar" {
        return Some(Sniffed::new("application/x-tar", "tar"));
    }
    if b.starts_with(b"wOFF") {
        return Some(Sniffed::new("font/woff", "woff"));
    }
    if b.starts_with(b"wOF2") {
        return Some(Sniffed::new("font/woff2", "woff2"));
    }
    if b.starts_with(&[0x00, 0x01, 0x00, 0x00, 0x00]) {
        return Some(Sniffed::new("font/ttf", "ttf"));
    }
    if b.starts_with(b"OTTO\x00") {
        return Some(Sniffed::new("font/otf", "otf"));
    }
    if b.starts_with(b"glTF") {
        return Some(Sniffed::new("model/gltf-binary", "glb"));
    }
    if b.starts_with(&[0x00, b'a', b's', b'm']) {
        return Some(Sniffed::new("application/wasm", "wasm"));
    }
    if b.starts_with(b"SQLite format 3\x00") {
        return Some(Sniffed::new("application/x-sqlite3", "sqlite"));
    }
    if b.starts_with(&[0x7F, b'E', b'L', b'F']) {
        return Some(Sniffed::new("application/x-elf", "elf"));
    }
    if b.starts_with(&[0xCF, 0xFA, 0xED, 0xFE])
        || b.starts_with(&[0xCE, 0xFA, 0xED, 0xFE])
        || b.starts_with(&[0xCA, 0xFE, 0xBA, 0xBE])
    {
        return Some(Sniffed::new("application/x-mach-binary", "macho"));
    }
    if b.starts_with(b"MZ") {
        return Some(Sniffed::new("application/x-msdownload", "exe"));
    }

    None
}

/// ISO base media (`ftyp` box): MP4, M4V, M4A, QuickTime, HEIC, AVIF.
fn sniff_iso_bmff(b: &[u8]) -> Option<Sniffed> {
    if b.len() < 12 || &b[4..8] != b"ftyp" {
        return None;
    }
    let brand = &b[8..12];
    let sniffed = match brand {
        b"avif" | b"avis" => Sniffed::new("image/avif", "avif"),
        b"heic" | b"heix" | b"mif1" | b"msf1" => Sniffed::new("image/heic", "heic"),
        b"qt  " => Sniffed::new("video/quicktime", "mov"),
        b"M4A " | b"M4B " => Sniffed::new("audio/x-m4a", "m4a"),
        b"M4V " | b"M4VH" | b"M4VP" => Sniffed::new("video/x-m4v", "m4v"),
        b"3gp4" | b"3gp5" | b"3gp6" => Sniffed::new("video/3gpp", "3gp"),
        b"isom" | b"iso2" | b"iso4" | b"iso5" | b"iso6" | b"mp41" | b"mp42" | b"avc1"
        | b"dash" | b"mmp4" | b"MSNV" => Sniffed::new("video/mp4", "mp4"),
        // jp2, crx (Canon raw) and other ftyp-based formats.
        _ => return None,
    };
    Some(sniffed)
}

/// EBML container: WebM or Matroska, distinguished by the DocType string.
fn sniff_ebml(b: &[u8]) -> Option<Sniffed> {
    if !b.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return None;
    }
    let header = &b[..b.len().min(64)];
    if header.windows(4).any(|w| w == b"webm") {
        Some(Sniffed::new("video/webm", "webm"))
    } else {
        Some(Sniffed::new("video/x-matroska", "mkv"))
    }
}

/// MPEG-1/2 layer III frame sync without an ID3 tag.
fn is_mpeg_audio_frame(b: &[u8]) -> bool {
    b.len() >= 2 && b[0] == 0xFF && matches!(b[1], 0xFB | 0xF3 | 0xF2)
}

/// Read up to [`SNIFF_LEN`] bytes from `reader` and sniff them.
pub async fn sniff_reader<R>(reader: &mut R) -> std::io::Result<Option<Sniffed>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(SNIFF_LEN);
    reader.take(SNIFF_LEN as u64).read_to_end(&mut buf).await?;
    Ok(sniff(&buf))
}

/// Sniff the file at `path`.
pub async fn sniff_path(path: &Path) -> std::io::Result<Option<Sniffed>> {
    let mut file = tokio::fs::File::open(path).await?;
    sniff_reader(&mut file).await
}
