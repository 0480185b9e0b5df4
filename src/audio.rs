//! Track resolution and audio fetching through yt-dlp.

use std::{path::PathBuf, process::Stdio, time::Duration};

use anyhow::{Context as AnyhowContext, Result, anyhow};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use tokio::{fs, process::Command as TokioCommand};
use tracing::debug;
use url::Url;

use crate::{error::UpstreamError, track::Track};

static HTTP: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent("maqam-bot/0.1")
        .build()
        .unwrap_or_default()
});

const GITHUB_RELEASES_API: &str = "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";

/// Fields printed for every resolved entry, tab separated.
const PRINT_TEMPLATE: &str = "%(id)s\t%(title)s\t%(duration)s\t%(webpage_url)s";

/// An audio file on local disk, ready to hand to the mixer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAudio {
    pub path: PathBuf,
}

/// Turns user queries into tracks and tracks into audio.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Free text is searched, a URL is looked up directly.
    async fn resolve(&self, query: &str) -> Result<Track, UpstreamError>;
    /// A follow-up for autoplay, seeded by the last played source.
    async fn related(&self, url: &str) -> Result<Option<Track>, UpstreamError>;
    async fn fetch_audio(&self, track: &Track) -> Result<LocalAudio, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    assets: Vec<ReleaseAsset>,
}

fn cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().ok_or_else(|| anyhow!("no cache dir available on this system"))?;
    Ok(base.join("maqam").join("yt-dlp"))
}

fn platform_asset_name() -> &'static str {
    if cfg!(target_os = "windows") {
        if cfg!(target_arch = "x86_64") {
            "yt-dlp.exe"
        } else {
            "yt-dlp_x86.exe"
        }
    } else if cfg!(target_os = "linux") {
        "yt-dlp_linux"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else {
        "yt-dlp"
    }
}

async fn ensure_yt_dlp() -> Result<PathBuf> {
    if let Ok(p) = which::which("yt-dlp") {
        return Ok(p);
    }

    let dir = cache_dir()?;
    fs::create_dir_all(&dir).await.ok();

    let local = dir.join(if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    });
    if fs::try_exists(&local).await.unwrap_or(false) {
        return Ok(local);
    }

    let resp = HTTP
        .get(GITHUB_RELEASES_API)
        .header(ACCEPT, "application/vnd.github+json")
        .send()
        .await?
        .error_for_status()?;
    let rel: ReleaseInfo = resp.json().await?;

    let wanted = platform_asset_name();
    let asset = rel
        .assets
        .into_iter()
        .find(|a| a.name == wanted)
        .ok_or_else(|| anyhow!("no suitable yt-dlp asset for this platform: {}", wanted))?;

    let bytes = HTTP
        .get(asset.browser_download_url)
        .header(USER_AGENT, "maqam-bot/0.1")
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    fs::write(&local, &bytes).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&local).await?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&local, perms).await?;
    }
    Ok(local)
}

fn download_base_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("DOWNLOAD_FOLDER") {
        let p = PathBuf::from(dir);
        if p.is_absolute() {
            Ok(p)
        } else {
            Ok(std::env::current_dir()?.join(p))
        }
    } else {
        Ok(cache_dir()?.join("downloads"))
    }
}

// Public helper so main can log where downloads are cached.
pub fn resolved_download_base_dir() -> Result<PathBuf> {
    download_base_dir()
}

fn is_link(query: &str) -> bool {
    Url::parse(query)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Pulls the video id out of the common YouTube URL shapes.
fn youtube_id(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    match host {
        "youtu.be" => url
            .path_segments()?
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        "youtube.com" | "music.youtube.com" => url
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned()),
        _ => None,
    }
}

/// Parses one line printed with [`PRINT_TEMPLATE`]. Flat playlist entries
/// lack `webpage_url`, so a watch URL is rebuilt from the id when needed.
fn parse_entry(line: &str) -> Option<Track> {
    let mut fields = line.split('\t');
    let id = fields.next()?.trim();
    let title = fields.next()?.trim();
    let duration = fields.next().map(str::trim).unwrap_or("NA");
    let page = fields.next().map(str::trim).unwrap_or("NA");
    if id.is_empty() || id == "NA" {
        return None;
    }

    let url = if page.is_empty() || page == "NA" {
        format!("https://www.youtube.com/watch?v={id}")
    } else {
        page.to_string()
    };
    let mut track = Track::new(if title.is_empty() { id } else { title }, url);
    if let Ok(secs) = duration.parse::<f64>()
        && secs.is_finite()
        && secs > 0.0
    {
        track = track.with_duration(Duration::from_secs_f64(secs));
    }
    Some(track)
}

/// yt-dlp backed resolver. Audio is cached as mp3 keyed by video id.
#[derive(Debug, Default, Clone)]
pub struct YtDlpResolver;

impl YtDlpResolver {
    async fn print_entries(&self, target: &str, extra: &[&str]) -> Result<Vec<Track>> {
        let ytdlp = ensure_yt_dlp().await?;
        let out = TokioCommand::new(&ytdlp)
            .args(extra)
            .arg("--print")
            .arg(PRINT_TEMPLATE)
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("-q")
            .arg(target)
            .stdin(Stdio::null())
            .output()
            .await
            .context("running yt-dlp to resolve metadata")?;
        if !out.status.success() {
            return Err(anyhow!("yt-dlp --print failed with status: {}", out.status));
        }
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(parse_entry)
            .collect())
    }

    async fn download_mp3(&self, url: &str) -> Result<PathBuf> {
        let ytdlp = ensure_yt_dlp().await?;
        let base = download_base_dir()?;
        fs::create_dir_all(&base).await?;

        let vid = match youtube_id(url) {
            Some(id) => id,
            None => format!(
                "ts-{}",
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos()
            ),
        };
        let cached = base.join(format!("{}.mp3", vid));
        if fs::try_exists(&cached).await.unwrap_or(false) {
            debug!("audio cache hit for {url}");
            return Ok(cached);
        }

        // Unique per-job directory so parallel downloads never collide.
        let unique = format!(
            "job-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let dir = base.join(unique);
        fs::create_dir_all(&dir).await?;

        let status = TokioCommand::new(&ytdlp)
            .arg("-f")
            .arg("bestaudio/best")
            .arg("-x")
            .arg("--audio-format")
            .arg("mp3")
            .arg("--audio-quality")
            .arg("0")
            .arg("--postprocessor-args")
            .arg("ffmpeg:-ar 48000 -ac 2") // Discord mixes at 48kHz stereo
            .arg("--no-playlist")
            .arg("-q")
            .arg("-o")
            .arg(dir.join("%(id)s.%(ext)s").to_string_lossy().to_string())
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("running yt-dlp download")?;
        if !status.success() {
            let _ = fs::remove_dir_all(&dir).await;
            return Err(anyhow!("yt-dlp failed with status: {status}"));
        }

        let mut entries = fs::read_dir(&dir).await?;
        let mut produced = None;
        while let Some(e) = entries.next_entry().await? {
            let p = e.path();
            if p.extension().and_then(|s| s.to_str()) == Some("mp3") {
                produced = Some(p);
                break;
            }
        }
        let p = produced.ok_or_else(|| anyhow!("no mp3 produced"))?;
        // Move into the cache, tolerating races and cross-device moves.
        let final_path = if fs::try_exists(&cached).await.unwrap_or(false)
            || fs::rename(&p, &cached).await.is_ok()
        {
            cached.clone()
        } else if fs::copy(&p, &cached).await.is_ok() {
            cached.clone()
        } else {
            return Err(anyhow!("could not move {} into the audio cache", p.display()));
        };
        let _ = fs::remove_dir_all(&dir).await;
        Ok(final_path)
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Track, UpstreamError> {
        let target = if is_link(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{query}")
        };
        let failed = |reason: String| UpstreamError::Resolve {
            query: query.to_string(),
            reason,
        };
        self.print_entries(&target, &["--no-playlist"])
            .await
            .map_err(|e| failed(format!("{e:#}")))?
            .into_iter()
            .next()
            .ok_or_else(|| failed("no results".to_string()))
    }

    async fn related(&self, url: &str) -> Result<Option<Track>, UpstreamError> {
        // The first entry of a YouTube mix is the seed itself.
        let Some(id) = youtube_id(url) else {
            return Ok(None);
        };
        let mix = format!("https://www.youtube.com/watch?v={id}&list=RD{id}");
        let entries = self
            .print_entries(&mix, &["--flat-playlist", "--playlist-items", "2:6"])
            .await
            .map_err(|e| UpstreamError::Resolve {
                query: url.to_string(),
                reason: format!("{e:#}"),
            })?;
        Ok(entries
            .into_iter()
            .find(|t| youtube_id(&t.url).as_deref() != Some(id.as_str())))
    }

    async fn fetch_audio(&self, track: &Track) -> Result<LocalAudio, UpstreamError> {
        self.download_mp3(&track.url)
            .await
            .map(|path| LocalAudio { path })
            .map_err(|e| UpstreamError::Resolve {
                query: track.url.clone(),
                reason: format!("{e:#}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_are_not_searched() {
        assert!(is_link("https://youtu.be/abc"));
        assert!(!is_link("fairuz kifak inta"));
        assert!(!is_link("ftp://example.com/x.mp3"));
    }

    #[test]
    fn youtube_ids_from_common_shapes() {
        assert_eq!(youtube_id("https://youtu.be/dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(
            youtube_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            youtube_id("https://music.youtube.com/watch?v=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(youtube_id("https://soundcloud.com/a/b"), None);
    }

    #[test]
    fn parses_full_entry() {
        let t = parse_entry("abc\tSome Song\t213.0\thttps://www.youtube.com/watch?v=abc").unwrap();
        assert_eq!(t.title, "Some Song");
        assert_eq!(t.url, "https://www.youtube.com/watch?v=abc");
        assert_eq!(t.duration, Some(Duration::from_secs(213)));
    }

    #[test]
    fn flat_entry_rebuilds_url_and_tolerates_missing_duration() {
        let t = parse_entry("xyz\tLive\tNA\tNA").unwrap();
        assert_eq!(t.url, "https://www.youtube.com/watch?v=xyz");
        assert_eq!(t.duration, None);
        assert!(parse_entry("NA\t\tNA\tNA").is_none());
        assert!(parse_entry("").is_none());
    }
}
