use crate::logger::log_candidate;
use crate::peer::engine::PeerConnection;
use crate::peer::types::IceCandidate;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Применяет отложенные кандидаты после установки remote description.
/// Ошибка одного кандидата не мешает остальным; возвращает (применено, с ошибкой).
pub async fn apply_candidates<C: PeerConnection + ?Sized>(
    connection: &C,
    candidates: Vec<IceCandidate>,
) -> (usize, usize) {
    let mut applied = 0;
    let mut failed = 0;
    for candidate in candidates {
        log_candidate("remote", &candidate);
        match connection.add_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => {
                tracing::warn!(error = %e, "failed to apply pending candidate");
                failed += 1;
            }
        }
    }
    (applied, failed)
}

pub fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

pub fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

/// Краткое описание кандидата для логов
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSummary {
    pub protocol: String,
    pub address: String,
    pub port: String,
    pub candidate_type: String,
}

/// Разбирает строку `candidate:<foundation> <component> <proto> <prio> <addr> <port> typ <type> ...`
pub fn summarize_candidate(candidate: &IceCandidate) -> Option<CandidateSummary> {
    let line = candidate.candidate.strip_prefix("candidate:")?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 || fields[6] != "typ" {
        return None;
    }
    Some(CandidateSummary {
        protocol: fields[2].to_ascii_lowercase(),
        address: fields[4].to_owned(),
        port: fields[5].to_owned(),
        candidate_type: fields[7].to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_candidate() {
        let c = IceCandidate::new(
            "candidate:842163049 1 UDP 1677729535 203.0.113.7 61665 typ srflx raddr 10.0.0.2 rport 61665",
        );
        let summary = summarize_candidate(&c).unwrap();
        assert_eq!(summary.protocol, "udp");
        assert_eq!(summary.address, "203.0.113.7");
        assert_eq!(summary.port, "61665");
        assert_eq!(summary.candidate_type, "srflx");

        assert!(summarize_candidate(&IceCandidate::new("")).is_none());
        assert!(summarize_candidate(&IceCandidate::new("candidate:1 1 udp 1 host")).is_none());
    }

    #[test]
    fn test_rtc_conversion_keeps_fields() {
        let mut c = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host");
        c.sdp_mid = Some("0".into());
        c.sdp_mline_index = Some(0);
        c.username_fragment = Some("abcd".into());
        assert_eq!(from_rtc_candidate(to_rtc_candidate(c.clone())), c);
    }
}
