//! Снимок статистики соединения в форме браузерного `RTCStatsReport`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatsType {
    OutboundRtp,
    InboundRtp,
    RemoteInboundRtp,
    RemoteOutboundRtp,
    Transport,
    CandidatePair,
    LocalCandidate,
    RemoteCandidate,
    #[serde(other)]
    Other,
}

/// Одна запись статистики. Поля, которых нет у данного типа, остаются `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub stats_type: StatsType,
    /// миллисекунды
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub is_remote: Option<bool>,

    // outbound-rtp
    #[serde(default)]
    pub bytes_sent: Option<u64>,
    #[serde(default)]
    pub header_bytes_sent: Option<u64>,
    #[serde(default)]
    pub packets_sent: Option<u64>,
    #[serde(default)]
    pub frames_encoded: Option<u64>,
    #[serde(default)]
    pub frames_per_second: Option<f64>,

    // remote-inbound-rtp, секунды
    #[serde(default)]
    pub jitter: Option<f64>,
    #[serde(default)]
    pub round_trip_time: Option<f64>,
    #[serde(default)]
    pub packets_lost: Option<i64>,

    // transport / candidate-pair
    #[serde(default)]
    pub selected_candidate_pair_id: Option<String>,
    #[serde(default)]
    pub selected: Option<bool>,
    #[serde(default)]
    pub nominated: Option<bool>,
    #[serde(default)]
    pub local_candidate_id: Option<String>,
    #[serde(default)]
    pub remote_candidate_id: Option<String>,

    // local-candidate / remote-candidate: разные движки называют адрес по-разному
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub port_number: Option<u16>,
    #[serde(default)]
    pub candidate_type: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

impl StatsRecord {
    pub fn new(id: impl Into<String>, stats_type: StatsType, timestamp: f64) -> Self {
        Self {
            id: id.into(),
            stats_type,
            timestamp,
            kind: None,
            is_remote: None,
            bytes_sent: None,
            header_bytes_sent: None,
            packets_sent: None,
            frames_encoded: None,
            frames_per_second: None,
            jitter: None,
            round_trip_time: None,
            packets_lost: None,
            selected_candidate_pair_id: None,
            selected: None,
            nominated: None,
            local_candidate_id: None,
            remote_candidate_id: None,
            address: None,
            ip: None,
            ip_address: None,
            port: None,
            port_number: None,
            candidate_type: None,
            protocol: None,
        }
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.as_deref() == Some(kind)
    }

    pub fn endpoint_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .or(self.ip.as_deref())
            .or(self.ip_address.as_deref())
    }

    pub fn endpoint_port(&self) -> Option<u16> {
        self.port.or(self.port_number)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    records: HashMap<String, StatsRecord>,
}

impl StatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Разбирает отчёт вида `{id: record}` или `[record]`.
    /// Записи, которые не удалось разобрать, пропускаются.
    pub fn from_json(value: serde_json::Value) -> Self {
        let values: Vec<serde_json::Value> = match value {
            serde_json::Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            serde_json::Value::Array(items) => items,
            _ => Vec::new(),
        };

        let mut report = Self::new();
        for value in values {
            match serde_json::from_value::<StatsRecord>(value) {
                Ok(record) => report.insert(record),
                Err(e) => trace!(error = %e, "skipping unparsable stats record"),
            }
        }
        report
    }

    pub fn insert(&mut self, record: StatsRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn with(mut self, record: StatsRecord) -> Self {
        self.insert(record);
        self
    }

    pub fn get(&self, id: &str) -> Option<&StatsRecord> {
        self.records.get(id)
    }

    /// Записи указанного типа, упорядоченные по id
    pub fn of_type(&self, stats_type: StatsType) -> Vec<&StatsRecord> {
        let mut records: Vec<&StatsRecord> = self
            .records
            .values()
            .filter(|r| r.stats_type == stats_type)
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Записи из `other` замещают записи с тем же id
    pub fn merge(&mut self, other: StatsReport) {
        self.records.extend(other.records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
