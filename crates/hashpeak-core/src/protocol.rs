//! Wire protocol model for the cgminer/sgminer JSON TCP API.
//!
//! One JSON object per request, no framing beyond a terminating NUL byte or
//! connection close. Responses carry a `STATUS` array plus a command-specific
//! payload array (`VERSION`, `GPU`, or nothing for pure status replies).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A single API command, constructed fresh per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Query daemon version. Doubles as a connectivity check.
    Version,
    /// Check that the API socket grants privileged (write) access.
    Privileged,
    /// Query telemetry for one GPU by id.
    Gpu(u32),
    /// Set the engine clock of one GPU, in MHz.
    GpuEngine { gpu: u32, clock: u32 },
}

impl Command {
    /// Command name as the daemon expects it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Privileged => "privileged",
            Self::Gpu(_) => "gpu",
            Self::GpuEngine { .. } => "gpuengine",
        }
    }

    /// Optional parameter string; `None` means the field is omitted entirely.
    pub fn parameter(&self) -> Option<String> {
        match self {
            Self::Version | Self::Privileged => None,
            Self::Gpu(id) => Some(id.to_string()),
            Self::GpuEngine { gpu, clock } => Some(format!("{gpu},{clock}")),
        }
    }

    /// Serialize to the single-line JSON request object.
    pub fn to_json(&self) -> String {
        let req = Request {
            command: self.name(),
            parameter: self.parameter(),
        };
        // A struct of two string fields cannot fail to serialize.
        serde_json::to_string(&req).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct Request<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter: Option<String>,
}

// ---------------------------------------------------------------------------
// Response sections
// ---------------------------------------------------------------------------

/// One entry of the `STATUS` array present in every reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSection {
    #[serde(rename = "STATUS", default)]
    pub status: String,
    #[serde(rename = "When", default)]
    pub when: i64,
    #[serde(rename = "Code", default)]
    pub code: i64,
    #[serde(rename = "Msg", default)]
    pub msg: String,
    #[serde(rename = "Description", default)]
    pub description: String,
}

impl StatusSection {
    /// True when the daemon reported an explicit error or failure code.
    pub fn is_rejection(&self) -> bool {
        self.status == "E" || self.status == "F"
    }
}

/// One entry of the `VERSION` array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionSection {
    #[serde(rename = "CGMiner", default)]
    pub cgminer: Option<String>,
    #[serde(rename = "SGMiner", default)]
    pub sgminer: Option<String>,
    #[serde(rename = "API", default)]
    pub api: Option<String>,
}

/// One entry of the `GPU` array: the telemetry snapshot for a single device.
///
/// Only the fields the sweep consumes are strongly needed, but the full set
/// the daemon reports is kept so partial payloads and future readers both
/// decode cleanly. Everything defaults so a sparse reply is not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuSection {
    #[serde(rename = "GPU", default)]
    pub gpu: u32,
    #[serde(rename = "Enabled", default)]
    pub enabled: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Temperature", default)]
    pub temperature: f64,
    #[serde(rename = "Fan Speed", default)]
    pub fan_speed: i64,
    #[serde(rename = "Fan Percent", default)]
    pub fan_percent: i64,
    #[serde(rename = "GPU Clock", default)]
    pub gpu_clock: u32,
    #[serde(rename = "Memory Clock", default)]
    pub memory_clock: u32,
    #[serde(rename = "GPU Voltage", default)]
    pub gpu_voltage: f64,
    #[serde(rename = "GPU Activity", default)]
    pub gpu_activity: i64,
    #[serde(rename = "Powertune", default)]
    pub powertune: i64,
    #[serde(rename = "MHS av", default)]
    pub mhs_av: f64,
    /// Average hashrate over the daemon's poll interval, in Mhash/s.
    ///
    /// The daemon names this key after its configured log interval
    /// ("MHS 5s", "MHS 30s", ...). [`normalize_mhs_key`] rewrites it to the
    /// fixed "MHS Xs" before decoding.
    #[serde(rename = "MHS Xs", default)]
    pub mhs_xs: f64,
    #[serde(rename = "Accepted", default)]
    pub accepted: i64,
    #[serde(rename = "Rejected", default)]
    pub rejected: i64,
    #[serde(rename = "Hardware Errors", default)]
    pub hardware_errors: u64,
    #[serde(rename = "Utility", default)]
    pub utility: f64,
    #[serde(rename = "Intensity", default)]
    pub intensity: String,
}

impl GpuSection {
    /// Instantaneous hashrate in khash/s, the unit the sweep records.
    pub fn hashrate_khs(&self) -> f64 {
        self.mhs_xs * 1000.0
    }
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// Reply to `version`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionResponse {
    #[serde(rename = "STATUS", default)]
    pub status: Vec<StatusSection>,
    #[serde(rename = "VERSION", default)]
    pub version: Vec<VersionSection>,
    #[serde(default)]
    pub id: i64,
}

/// Reply to `gpu`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuResponse {
    #[serde(rename = "STATUS", default)]
    pub status: Vec<StatusSection>,
    #[serde(rename = "GPU", default)]
    pub gpu: Vec<GpuSection>,
    #[serde(default)]
    pub id: i64,
}

/// Reply to commands that carry no payload beyond status (`privileged`,
/// `gpuengine`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "STATUS", default)]
    pub status: Vec<StatusSection>,
    #[serde(default)]
    pub id: i64,
}

/// A decoded reply, tagged by the command that produced it.
#[derive(Debug, Clone)]
pub enum Response {
    Version(VersionResponse),
    Gpu(GpuResponse),
    Status(StatusResponse),
}

impl Response {
    /// Decode raw response text according to the command that produced it.
    ///
    /// GPU telemetry replies get the MHS key normalization first; other
    /// response types are decoded as-is. Text that decodes to nothing
    /// meaningful (no status sections at all) is an unexpected response.
    pub fn decode(command: &Command, raw: &str) -> Result<Self> {
        let decoded = match command {
            Command::Version => serde_json::from_str::<VersionResponse>(raw)
                .map(Self::Version)
                .map_err(|e| Error::UnexpectedResponse(e.to_string()))?,
            Command::Gpu(_) => {
                let normalized = normalize_mhs_key(raw);
                serde_json::from_str::<GpuResponse>(&normalized)
                    .map(Self::Gpu)
                    .map_err(|e| Error::UnexpectedResponse(e.to_string()))?
            }
            Command::Privileged | Command::GpuEngine { .. } => {
                serde_json::from_str::<StatusResponse>(raw)
                    .map(Self::Status)
                    .map_err(|e| Error::UnexpectedResponse(e.to_string()))?
            }
        };

        if decoded.status_sections().is_empty() {
            return Err(Error::UnexpectedResponse(
                "reply carried no status section".into(),
            ));
        }
        Ok(decoded)
    }

    /// The `STATUS` array common to every reply shape.
    pub fn status_sections(&self) -> &[StatusSection] {
        match self {
            Self::Version(r) => &r.status,
            Self::Gpu(r) => &r.status,
            Self::Status(r) => &r.status,
        }
    }

    /// First status section, or an unexpected-response error when missing.
    pub fn first_status(&self) -> Result<&StatusSection> {
        self.status_sections()
            .first()
            .ok_or_else(|| Error::UnexpectedResponse("reply carried no status section".into()))
    }

    /// Unwrap as a version reply.
    pub fn into_version(self) -> Result<VersionResponse> {
        match self {
            Self::Version(r) => Ok(r),
            other => Err(Error::UnexpectedResponse(format!(
                "expected version reply, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Unwrap as a GPU telemetry reply.
    pub fn into_gpu(self) -> Result<GpuResponse> {
        match self {
            Self::Gpu(r) => Ok(r),
            other => Err(Error::UnexpectedResponse(format!(
                "expected gpu reply, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Unwrap as a status-only reply.
    pub fn into_status(self) -> Result<StatusResponse> {
        match self {
            Self::Status(r) => Ok(r),
            other => Err(Error::UnexpectedResponse(format!(
                "expected status reply, got {}",
                other.kind_name()
            ))),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::Gpu(_) => "gpu",
            Self::Status(_) => "status",
        }
    }
}

// ---------------------------------------------------------------------------
// MHS key normalization
// ---------------------------------------------------------------------------

/// Rewrite the poll-interval-dependent hashrate key to a stable name.
///
/// The daemon names the short-average hashrate key after its configured log
/// interval: `"MHS 5s"`, `"MHS 30s"`, and so on. This rewrites any
/// `"MHS <digits>s"` key to `"MHS Xs"` so one struct field can decode all
/// configurations. `"MHS av"` and already-normalized keys pass through
/// untouched.
pub fn normalize_mhs_key(raw: &str) -> String {
    const PREFIX: &str = "\"MHS ";

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find(PREFIX) {
        let after = pos + PREFIX.len();
        out.push_str(&rest[..after]);
        let tail = &rest[after..];

        let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && tail[digits..].starts_with("s\"") {
            out.push_str("Xs\"");
            rest = &tail[digits + 2..];
        } else {
            rest = tail;
        }
    }

    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Request serialization
    // -----------------------------------------------------------------------

    #[test]
    fn request_without_parameter_omits_field() {
        assert_eq!(Command::Version.to_json(), r#"{"command":"version"}"#);
        assert_eq!(Command::Privileged.to_json(), r#"{"command":"privileged"}"#);
    }

    #[test]
    fn request_with_parameter() {
        assert_eq!(
            Command::Gpu(3).to_json(),
            r#"{"command":"gpu","parameter":"3"}"#
        );
        assert_eq!(
            Command::GpuEngine { gpu: 0, clock: 950 }.to_json(),
            r#"{"command":"gpuengine","parameter":"0,950"}"#
        );
    }

    // -----------------------------------------------------------------------
    // MHS key normalization
    // -----------------------------------------------------------------------

    #[test]
    fn normalizes_interval_key() {
        let raw = r#"{"MHS 5s": 123.4}"#;
        assert_eq!(normalize_mhs_key(raw), r#"{"MHS Xs": 123.4}"#);
    }

    #[test]
    fn normalizes_multi_digit_interval() {
        let raw = r#"{"MHS 30s": 1.0, "MHS 300s": 2.0}"#;
        assert_eq!(normalize_mhs_key(raw), r#"{"MHS Xs": 1.0, "MHS Xs": 2.0}"#);
    }

    #[test]
    fn leaves_average_key_alone() {
        let raw = r#"{"MHS av": 9.5, "MHS 5s": 9.6}"#;
        assert_eq!(normalize_mhs_key(raw), r#"{"MHS av": 9.5, "MHS Xs": 9.6}"#);
    }

    #[test]
    fn already_normalized_is_identity() {
        let raw = r#"{"MHS Xs": 123.4}"#;
        assert_eq!(normalize_mhs_key(raw), raw);
    }

    #[test]
    fn interval_and_fixed_keys_decode_identically() {
        let a = r#"{"STATUS":[{"STATUS":"S"}],"GPU":[{"GPU":0,"MHS 5s":123.4}],"id":1}"#;
        let b = r#"{"STATUS":[{"STATUS":"S"}],"GPU":[{"GPU":0,"MHS Xs":123.4}],"id":1}"#;

        let ra = Response::decode(&Command::Gpu(0), a).unwrap().into_gpu().unwrap();
        let rb = Response::decode(&Command::Gpu(0), b).unwrap().into_gpu().unwrap();
        assert_eq!(ra.gpu[0].mhs_xs, rb.gpu[0].mhs_xs);
        assert_eq!(ra.gpu[0].mhs_xs, 123.4);
    }

    // -----------------------------------------------------------------------
    // Response decoding
    // -----------------------------------------------------------------------

    #[test]
    fn decodes_gpu_telemetry() {
        let raw = r#"{
            "STATUS": [{"STATUS":"S","When":1401234567,"Code":17,"Msg":"GPU0","Description":"sgminer 4.1.0"}],
            "GPU": [{"GPU":0,"Enabled":"Y","Status":"Alive","Temperature":71.0,
                     "GPU Clock":1050,"Memory Clock":1500,"MHS av":0.61,"MHS 5s":0.6234,
                     "Hardware Errors":3,"Accepted":120,"Rejected":2}],
            "id": 1
        }"#;

        let gpu = Response::decode(&Command::Gpu(0), raw)
            .unwrap()
            .into_gpu()
            .unwrap();
        let section = &gpu.gpu[0];
        assert_eq!(section.gpu_clock, 1050);
        assert_eq!(section.memory_clock, 1500);
        assert_eq!(section.hardware_errors, 3);
        assert_eq!(section.status, "Alive");
        assert!((section.hashrate_khs() - 623.4).abs() < 1e-9);
    }

    #[test]
    fn decodes_version_reply() {
        let raw = r#"{
            "STATUS": [{"STATUS":"S","Msg":"CGMiner versions","Description":"cgminer 4.9.2"}],
            "VERSION": [{"CGMiner":"4.9.2","API":"3.1"}],
            "id": 1
        }"#;

        let ver = Response::decode(&Command::Version, raw)
            .unwrap()
            .into_version()
            .unwrap();
        assert_eq!(ver.status[0].description, "cgminer 4.9.2");
        assert_eq!(ver.version[0].cgminer.as_deref(), Some("4.9.2"));
    }

    #[test]
    fn empty_reply_is_unexpected() {
        let err = Response::decode(&Command::Privileged, "{}").unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }

    #[test]
    fn garbage_reply_is_unexpected() {
        let err = Response::decode(&Command::Version, "not json at all").unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }

    #[test]
    fn status_letters() {
        let ok = StatusSection {
            status: "S".into(),
            ..Default::default()
        };
        let err = StatusSection {
            status: "E".into(),
            ..Default::default()
        };
        let fatal = StatusSection {
            status: "F".into(),
            ..Default::default()
        };
        assert!(!ok.is_rejection());
        assert!(err.is_rejection());
        assert!(fatal.is_rejection());
    }

    #[test]
    fn wrong_shape_accessor_fails() {
        let raw = r#"{"STATUS":[{"STATUS":"S"}],"id":1}"#;
        let resp = Response::decode(&Command::Privileged, raw).unwrap();
        assert!(resp.into_gpu().is_err());
    }
}
