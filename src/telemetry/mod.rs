//! Метрики звонка, вычисляемые из последовательных снимков статистики.

pub mod sampler;
pub mod stats;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stats::{StatsRecord, StatsReport, StatsType};
use std::fmt;

/// Адрес и порт одной стороны выбранной пары кандидатов
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkEndpoint {
    pub address: Option<String>,
    pub port: Option<u16>,
}

impl NetworkEndpoint {
    fn from_record(record: &StatsRecord) -> Self {
        Self {
            address: record.endpoint_address().map(str::to_owned),
            port: record.endpoint_port(),
        }
    }
}

impl fmt::Display for NetworkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self.address.as_deref().unwrap_or("?");
        match self.port {
            Some(port) => write!(f, "{address} | {port}"),
            None => write!(f, "{address}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkPath {
    pub local: NetworkEndpoint,
    pub remote: NetworkEndpoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundStatistics {
    /// kbps
    pub bitrate: Option<u64>,
    /// kbps
    pub header_bitrate: Option<u64>,
    /// пакетов в секунду
    pub packet_rate: Option<u64>,
    pub frames_per_second: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInboundStatistics {
    /// все значения в миллисекундах
    pub jitter: Option<u64>,
    pub round_trip_time: Option<u64>,
    pub latency: Option<u64>,
    pub packets_lost: Option<i64>,
}

/// Метрики сессии за последний тик
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub bitrate_kbps: Option<u64>,
    pub header_bitrate_kbps: Option<u64>,
    pub packet_rate: Option<u64>,
    pub frames_per_second: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub round_trip_time_ms: Option<u64>,
    pub latency_ms: Option<u64>,
    pub packets_lost: Option<i64>,
    pub local_endpoint: Option<NetworkEndpoint>,
    pub remote_endpoint: Option<NetworkEndpoint>,
    pub sampled_at: Option<DateTime<Utc>>,
}

/// Скорость изменения счётчика между двумя записями с одним id.
/// `factor` 8 даёт kbps из байт, 1000 даёт штук в секунду.
fn rate(
    current: &StatsRecord,
    previous: &StatsRecord,
    field: impl Fn(&StatsRecord) -> Option<u64>,
    factor: f64,
) -> Option<u64> {
    if current.id != previous.id {
        return None;
    }
    let dt = current.timestamp - previous.timestamp;
    if dt <= 0.0 {
        return None;
    }
    let (now, before) = (field(current)?, field(previous)?);
    let delta = now.checked_sub(before)?;
    Some((factor * delta as f64 / dt).floor() as u64)
}

fn pick_preferring_video(records: Vec<&StatsRecord>) -> Option<&StatsRecord> {
    let local: Vec<&StatsRecord> = records
        .into_iter()
        .filter(|r| r.is_remote != Some(true))
        .collect();
    local
        .iter()
        .find(|r| r.is_kind("video"))
        .or_else(|| local.first())
        .copied()
}

/// Битрейт, частота пакетов и кадров исходящего потока.
///
/// Без предыдущего снимка с той же записью скоростные метрики не вычисляются.
pub fn calculate_outbound_statistics(
    current: &StatsReport,
    previous: Option<&StatsReport>,
) -> Option<OutboundStatistics> {
    let record = pick_preferring_video(current.of_type(StatsType::OutboundRtp))?;
    let before = previous.and_then(|p| p.get(&record.id));

    let mut out = OutboundStatistics {
        frames_per_second: record.frames_per_second.map(|f| f.floor() as u64),
        ..Default::default()
    };
    if let Some(before) = before {
        out.bitrate = rate(record, before, |r| r.bytes_sent, 8.0);
        out.header_bitrate = rate(record, before, |r| r.header_bytes_sent, 8.0);
        out.packet_rate = rate(record, before, |r| r.packets_sent, 1000.0);
        if out.frames_per_second.is_none() {
            out.frames_per_second = rate(record, before, |r| r.frames_encoded, 1000.0);
        }
    }
    Some(out)
}

/// Jitter, RTT, задержка и потери по отчёту удалённой стороны
pub fn calculate_remote_inbound_statistics(current: &StatsReport) -> Option<RemoteInboundStatistics> {
    let records = current.of_type(StatsType::RemoteInboundRtp);
    let record = records
        .iter()
        .find(|r| r.is_kind("video"))
        .or_else(|| records.first())?;

    let to_ms = |seconds: f64| (seconds * 1000.0).floor() as u64;
    Some(RemoteInboundStatistics {
        jitter: record.jitter.map(to_ms),
        round_trip_time: record.round_trip_time.map(to_ms),
        latency: record
            .round_trip_time
            .map(|rtt| (rtt * 1000.0 / 2.0).floor() as u64),
        packets_lost: record.packets_lost,
    })
}

/// Находит выбранную пару кандидатов: сначала через транспорт, затем по флагу
/// `selected`, затем по `nominated`.
pub fn resolve_network_path(report: &StatsReport) -> Option<NetworkPath> {
    let via_transport = report
        .of_type(StatsType::Transport)
        .into_iter()
        .filter_map(|t| t.selected_candidate_pair_id.as_deref())
        .find_map(|id| report.get(id));

    let pairs = report.of_type(StatsType::CandidatePair);
    let pair = via_transport
        .or_else(|| pairs.iter().copied().find(|p| p.selected == Some(true)))
        .or_else(|| pairs.iter().copied().find(|p| p.nominated == Some(true)))?;

    let local = report.get(pair.local_candidate_id.as_deref()?)?;
    let remote = report.get(pair.remote_candidate_id.as_deref()?)?;
    Some(NetworkPath {
        local: NetworkEndpoint::from_record(local),
        remote: NetworkEndpoint::from_record(remote),
    })
}

/// Состояние телеметрии одной сессии
#[derive(Debug, Default)]
pub struct TelemetryTracker {
    previous: Option<StatsReport>,
    path: Option<NetworkPath>,
    latest: Option<Telemetry>,
}

impl TelemetryTracker {
    pub fn update(&mut self, report: StatsReport) -> &Telemetry {
        let outbound = calculate_outbound_statistics(&report, self.previous.as_ref());
        let inbound = calculate_remote_inbound_statistics(&report);

        // путь не меняется за время звонка, достаточно найти один раз
        if self.path.is_none() {
            self.path = resolve_network_path(&report);
        }

        let outbound = outbound.unwrap_or_default();
        let inbound = inbound.unwrap_or_default();
        let telemetry = Telemetry {
            bitrate_kbps: outbound.bitrate,
            header_bitrate_kbps: outbound.header_bitrate,
            packet_rate: outbound.packet_rate,
            frames_per_second: outbound.frames_per_second,
            jitter_ms: inbound.jitter,
            round_trip_time_ms: inbound.round_trip_time,
            latency_ms: inbound.latency,
            packets_lost: inbound.packets_lost,
            local_endpoint: self.path.as_ref().map(|p| p.local.clone()),
            remote_endpoint: self.path.as_ref().map(|p| p.remote.clone()),
            sampled_at: Some(Utc::now()),
        };

        self.previous = Some(report);
        self.latest.insert(telemetry)
    }

    pub fn latest(&self) -> Option<&Telemetry> {
        self.latest.as_ref()
    }

    pub fn last_report(&self) -> Option<&StatsReport> {
        self.previous.as_ref()
    }

    pub fn network_path(&self) -> Option<&NetworkPath> {
        self.path.as_ref()
    }

    pub fn clear(&mut self) {
        self.previous = None;
        self.path = None;
        self.latest = None;
    }
}
