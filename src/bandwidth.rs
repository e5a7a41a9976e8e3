//! Ограничение битрейта видео и выбор кодеков.

use crate::peer::engine::{EngineError, PeerConnection, SendEncoding, SendParameters};
use crate::peer::types::{CodecCapability, MediaKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Модификатор строки `b=`: AS в kbps (Chrome), TIAS в bps (Firefox)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthConvention {
    #[default]
    As,
    Tias,
}

impl BandwidthConvention {
    pub fn modifier(self) -> &'static str {
        match self {
            BandwidthConvention::As => "AS",
            BandwidthConvention::Tias => "TIAS",
        }
    }

    pub fn value(self, kbps: u32) -> u64 {
        match self {
            BandwidthConvention::As => u64::from(kbps),
            BandwidthConvention::Tias => u64::from(kbps) * 1000,
        }
    }
}

/// Границы секции, к которой относится ограничение: видео, иначе первая медиа-секция
fn media_section(lines: &[&str]) -> Option<(usize, usize)> {
    let starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.starts_with("m="))
        .map(|(i, _)| i)
        .collect();
    let pick = starts
        .iter()
        .position(|&i| lines[i].starts_with("m=video"))
        .unwrap_or(0);
    let start = *starts.get(pick)?;
    let end = starts.get(pick + 1).copied().unwrap_or(lines.len());
    Some((start, end))
}

/// Вставляет или заменяет строку `b=` в видео-секции SDP.
///
/// Строка идёт после `i=`/`c=` секции (или сразу после `m=`), существующая
/// строка того же модификатора заменяется. Разделитель строк сохраняется.
pub fn update_bandwidth_restriction(sdp: &str, kbps: u32, convention: BandwidthConvention) -> String {
    let prefix = format!("b={}:", convention.modifier());
    let restriction = format!("{prefix}{}", convention.value(kbps));

    let eol = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing = sdp.ends_with(eol);
    let body = sdp.strip_suffix(eol).unwrap_or(sdp);
    let mut lines: Vec<&str> = body.split(eol).collect();

    let Some((start, end)) = media_section(&lines) else {
        warn!("SDP has no media section, bandwidth restriction not applied");
        return sdp.to_owned();
    };

    if let Some(i) = (start..end).find(|&i| lines[i].starts_with(&prefix)) {
        lines[i] = &restriction;
    } else {
        let mut at = start + 1;
        while at < end && (lines[at].starts_with("i=") || lines[at].starts_with("c=")) {
            at += 1;
        }
        lines.insert(at, &restriction);
    }

    let mut out = lines.join(eol);
    if trailing {
        out.push_str(eol);
    }
    out
}

/// 0 снимает ограничение, иначе `kbps * 1000` на первый encoding
pub fn apply_max_bitrate(parameters: &mut SendParameters, kbps: u32) {
    if parameters.encodings.is_empty() {
        // некоторые движки отдают параметры без encodings
        parameters.encodings.push(SendEncoding::default());
    }
    parameters.encodings[0].max_bitrate = (kbps > 0).then(|| u64::from(kbps) * 1000);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateOutcome {
    Applied,
    NoVideoSender,
}

/// Меняет максимальный битрейт видео-сендера без пересогласования
pub async fn update_sender_bitrate<C: PeerConnection>(
    connection: Arc<C>,
    kbps: u32,
) -> Result<BitrateOutcome, EngineError> {
    if !connection.supports_sender_parameters() {
        return Err(EngineError::Unsupported("sender parameters"));
    }
    let Some(mut parameters) = connection.video_send_parameters().await? else {
        return Ok(BitrateOutcome::NoVideoSender);
    };
    apply_max_bitrate(&mut parameters, kbps);
    connection.set_video_send_parameters(parameters).await?;
    Ok(BitrateOutcome::Applied)
}

/// Переносит предпочитаемый кодек в начало списка. Остальные кодеки сохраняются в
/// исходном порядке; `false`, если кодек не найден и порядок не изменился.
pub fn prefer_codec(codecs: &mut Vec<CodecCapability>, preferred: &CodecCapability) -> bool {
    let Some(index) = codecs.iter().position(|c| preferred.matches(c)) else {
        return false;
    };
    let codec = codecs.remove(index);
    codecs.insert(0, codec);
    true
}

pub async fn set_preferred_codec<C: PeerConnection>(
    connection: &C,
    kind: MediaKind,
    preferred: &CodecCapability,
) -> Result<bool, EngineError> {
    let mut codecs = connection.codec_capabilities(kind).await?;
    if !prefer_codec(&mut codecs, preferred) {
        info!(%kind, mime_type = %preferred.mime_type, "preferred codec not offered by engine, order unchanged");
        return Ok(false);
    }
    debug!(%kind, mime_type = %preferred.mime_type, "setting codec preferences");
    connection.set_codec_preferences(kind, codecs).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\n";

    #[test]
    fn test_inserts_after_video_connection_line() {
        let out = update_bandwidth_restriction(OFFER, 500, BandwidthConvention::As);
        let lines: Vec<&str> = out.split("\r\n").collect();
        let video = lines.iter().position(|l| l.starts_with("m=video")).unwrap();
        assert_eq!(lines[video + 1], "c=IN IP4 0.0.0.0");
        assert_eq!(lines[video + 2], "b=AS:500");
        assert_eq!(out.matches("b=AS:").count(), 1);
        assert!(out.ends_with("\r\n"));
        assert!(!out.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_second_update_replaces_first() {
        let once = update_bandwidth_restriction(OFFER, 500, BandwidthConvention::As);
        let twice = update_bandwidth_restriction(&once, 300, BandwidthConvention::As);
        assert_eq!(twice.matches("b=AS:").count(), 1);
        assert!(twice.contains("b=AS:300"));
        assert_eq!(twice.len(), once.len());
    }

    #[test]
    fn test_tias_in_bits_per_second() {
        let out = update_bandwidth_restriction(OFFER, 500, BandwidthConvention::Tias);
        assert!(out.contains("b=TIAS:500000"));
        assert!(!out.contains("b=AS:"));
    }

    #[test]
    fn test_falls_back_to_first_section_without_connection_line() {
        let sdp = "v=0\nm=audio 9 RTP/AVP 0\na=rtpmap:0 PCMU/8000\n";
        let out = update_bandwidth_restriction(sdp, 64, BandwidthConvention::As);
        assert_eq!(out, "v=0\nm=audio 9 RTP/AVP 0\nb=AS:64\na=rtpmap:0 PCMU/8000\n");
    }

    #[test]
    fn test_no_media_section_left_untouched() {
        let sdp = "v=0\r\ns=-\r\n";
        assert_eq!(update_bandwidth_restriction(sdp, 64, BandwidthConvention::As), sdp);
    }

    #[test]
    fn test_apply_max_bitrate() {
        let mut params = SendParameters::default();
        apply_max_bitrate(&mut params, 800);
        assert_eq!(params.encodings.len(), 1);
        assert_eq!(params.encodings[0].max_bitrate, Some(800_000));

        apply_max_bitrate(&mut params, 0);
        assert_eq!(params.encodings[0].max_bitrate, None);
    }

    #[test]
    fn test_prefer_codec_reorders_without_filtering() {
        let mut codecs = vec![
            CodecCapability::from_mime("video/VP8"),
            CodecCapability::from_mime("video/H264"),
            CodecCapability::from_mime("video/VP9"),
        ];
        assert!(prefer_codec(&mut codecs, &CodecCapability::from_mime("video/vp9")));
        let order: Vec<&str> = codecs.iter().map(|c| c.mime_type.as_str()).collect();
        assert_eq!(order, ["video/VP9", "video/VP8", "video/H264"]);

        assert!(!prefer_codec(&mut codecs, &CodecCapability::from_mime("video/AV1")));
        assert_eq!(codecs.len(), 3);
        assert_eq!(codecs[0].mime_type, "video/VP9");
    }
}
