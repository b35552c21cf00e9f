//! Path-finding and monitoring service clients.

use crate::{Config, ServiceSettings, SkeinError, SkeinResult};

/// On-chain identifying data for a channel, captured by
/// `store_channel_info` and consumed by `assert_ms_claim`. Lives for one
/// scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChannelInfo {
    pub token_network_address: String,
    pub channel_identifier: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfsHistory {
    pub request_count: u64,
    /// Route node-address sequences returned across the logged requests.
    pub routes: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfsIou {
    pub amount: u128,
}

pub trait PfsApi: Send + Sync {
    /// Live route query; each path is a node-address sequence.
    fn routes(&self, from: &str, to: &str, amount: u128) -> SkeinResult<Vec<Vec<String>>>;

    fn history(&self, source: &str, target: &str) -> SkeinResult<PfsHistory>;

    /// `None` when the PFS holds no IOU for the source.
    fn iou(&self, source: &str) -> SkeinResult<Option<PfsIou>>;
}

pub trait MsApi: Send + Sync {
    /// Whether the monitoring service has claimed its reward on-chain for
    /// the given channel.
    fn claim_observed(&self, channel: &StoredChannelInfo) -> SkeinResult<bool>;
}

pub struct HttpPfs {
    base_url: Option<String>,
    token_network: String,
    agent: ureq::Agent,
}

impl HttpPfs {
    pub fn from_settings(settings: &ServiceSettings, token_network: String, config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.http_timeout()).build();
        Self {
            base_url: settings.pfs.clone().map(|u| u.trim_end_matches('/').to_string()),
            token_network,
            agent,
        }
    }

    fn base(&self) -> SkeinResult<&str> {
        self.base_url.as_deref().ok_or_else(|| {
            SkeinError::Configuration("settings.services.pfs is not set".to_string())
        })
    }

    fn get_json(&self, url: &str) -> SkeinResult<(u16, serde_json::Value)> {
        let response = match self.agent.request("GET", url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(err) => return Err(SkeinError::ServiceQuery(format!("pfs: {err}"))),
        };
        let status = response.status();
        let body = response.into_json().unwrap_or(serde_json::Value::Null);
        Ok((status, body))
    }
}

fn decode_routes(value: &serde_json::Value) -> Vec<Vec<String>> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let path = entry.get("path").unwrap_or(entry);
            path.as_array().map(|hops| {
                hops.iter()
                    .filter_map(|h| h.as_str().map(str::to_string))
                    .collect()
            })
        })
        .collect()
}

impl PfsApi for HttpPfs {
    fn routes(&self, from: &str, to: &str, amount: u128) -> SkeinResult<Vec<Vec<String>>> {
        let base = self.base()?;
        let url = format!("{base}/api/v1/{}/paths", self.token_network);
        let payload = serde_json::json!({
            "from": from,
            "to": to,
            "value": amount.to_string(),
        });
        let response = match self.agent.request("POST", &url).send_json(payload) {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(err) => return Err(SkeinError::ServiceQuery(format!("pfs route query: {err}"))),
        };
        let body: serde_json::Value = response.into_json().unwrap_or(serde_json::Value::Null);
        Ok(decode_routes(body.get("result").unwrap_or(&body)))
    }

    fn history(&self, source: &str, target: &str) -> SkeinResult<PfsHistory> {
        let base = self.base()?;
        let url = format!("{base}/api/v2/info/{source}/{target}/requests");
        let (status, body) = self.get_json(&url)?;
        if status == 404 {
            return Ok(PfsHistory {
                request_count: 0,
                routes: Vec::new(),
            });
        }
        if !(200..300).contains(&status) {
            return Err(SkeinError::ServiceQuery(format!(
                "pfs history returned HTTP {status}"
            )));
        }
        let request_count = body
            .get("request_count")
            .and_then(|c| c.as_u64())
            .ok_or_else(|| SkeinError::ServiceQuery("pfs history: missing request_count".into()))?;
        let routes = body
            .get("routes")
            .map(decode_routes)
            .unwrap_or_default();
        Ok(PfsHistory {
            request_count,
            routes,
        })
    }

    fn iou(&self, source: &str) -> SkeinResult<Option<PfsIou>> {
        let base = self.base()?;
        let url = format!("{base}/api/v1/{source}/iou");
        let (status, body) = self.get_json(&url)?;
        if status == 404 {
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(SkeinError::ServiceQuery(format!(
                "pfs iou returned HTTP {status}"
            )));
        }
        let amount = body
            .get("amount")
            .ok_or_else(|| SkeinError::ServiceQuery("pfs iou: missing amount".into()))?;
        let amount = match amount {
            serde_json::Value::Number(n) => n.as_u64().map(u128::from),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| SkeinError::ServiceQuery("pfs iou: unparseable amount".into()))?;
        Ok(Some(PfsIou { amount }))
    }
}

pub struct HttpMs {
    base_url: Option<String>,
    agent: ureq::Agent,
}

impl HttpMs {
    pub fn from_settings(settings: &ServiceSettings, config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.http_timeout()).build();
        Self {
            base_url: settings.ms.clone().map(|u| u.trim_end_matches('/').to_string()),
            agent,
        }
    }
}

impl MsApi for HttpMs {
    fn claim_observed(&self, channel: &StoredChannelInfo) -> SkeinResult<bool> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            SkeinError::Configuration("settings.services.ms is not set".to_string())
        })?;
        let url = format!(
            "{base}/api/v1/claims/{}/{}",
            channel.token_network_address, channel.channel_identifier
        );
        let response = match self.agent.request("GET", &url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(err) => return Err(SkeinError::ServiceQuery(format!("ms: {err}"))),
        };
        let status = response.status();
        if status == 404 {
            return Ok(false);
        }
        if !(200..300).contains(&status) {
            return Err(SkeinError::ServiceQuery(format!(
                "ms claim query returned HTTP {status}"
            )));
        }
        let body: serde_json::Value = response.into_json().unwrap_or(serde_json::Value::Null);
        Ok(body.get("claimed").and_then(|c| c.as_bool()).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_routes_accepts_wrapped_and_bare_paths() {
        let wrapped = serde_json::json!([
            {"path": ["0xa", "0xb"], "estimated_fee": 3},
            {"path": ["0xa", "0xc", "0xb"]},
        ]);
        assert_eq!(
            decode_routes(&wrapped),
            vec![
                vec!["0xa".to_string(), "0xb".to_string()],
                vec!["0xa".to_string(), "0xc".to_string(), "0xb".to_string()],
            ]
        );

        let bare = serde_json::json!([["0xa", "0xb"]]);
        assert_eq!(decode_routes(&bare), vec![vec!["0xa".to_string(), "0xb".to_string()]]);
    }
}
