use tracing::debug;
use url::Url;

pub type TriggerKind = &'static str;
pub const YOUTUBE_TRIGGER: TriggerKind = "youtube-download";
pub const TIKTOK_TRIGGER: TriggerKind = "tiktok-download";
pub const GENERIC_TRIGGER: TriggerKind = "video-download";

/// Output modes the download workflows accept
pub const DOWNLOAD_TYPES: [&str; 3] = ["video", "audio", "best"];
pub const DEFAULT_DOWNLOAD_TYPE: &str = "video";

const YOUTUBE_HOSTS: [&str; 3] = ["youtube.com", "youtu.be", "youtube-nocookie.com"];
const TIKTOK_HOSTS: [&str; 1] = ["tiktok.com"];

/// Extract the lowercased host of a video URL, accepting scheme-less input.
fn host_of(video_url: &str) -> Option<String> {
    let trimmed = video_url.trim();
    if trimmed.is_empty() {
        return None;
    }

    let parsed = Url::parse(trimmed)
        .or_else(|_| Url::parse(&format!("https://{trimmed}")))
        .ok()?;

    parsed.host_str().map(|host| host.to_ascii_lowercase())
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Map a video URL to the workflow trigger that downloads it.
///
/// Unknown hosts map to the generic trigger instead of failing; the form
/// validation has already rejected anything outside the supported sites.
pub fn classify(video_url: &str) -> TriggerKind {
    let Some(host) = host_of(video_url) else {
        debug!(video_url, "Unparseable video URL, using generic trigger");
        return GENERIC_TRIGGER;
    };

    if YOUTUBE_HOSTS
        .iter()
        .any(|domain| host_matches(&host, domain))
    {
        YOUTUBE_TRIGGER
    } else if TIKTOK_HOSTS.iter().any(|domain| host_matches(&host, domain)) {
        TIKTOK_TRIGGER
    } else {
        GENERIC_TRIGGER
    }
}

/// Whether the URL points at one of the sites the workflows can download from.
pub fn is_supported(video_url: &str) -> bool {
    classify(video_url) != GENERIC_TRIGGER
}
