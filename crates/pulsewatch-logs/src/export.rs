use pulsewatch_types::LogEntry;

/// Supported export encodings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// Serialize entries for download
///
/// The JSON form parses back to exactly the exported entries.
pub fn export(entries: &[LogEntry], format: ExportFormat) -> Vec<u8> {
    match format {
        ExportFormat::Json => serde_json::to_vec_pretty(entries).unwrap_or_default(),
        ExportFormat::Csv => export_csv(entries).into_bytes(),
    }
}

fn export_csv(entries: &[LogEntry]) -> String {
    let mut out = String::from("id,timestamp,severity,source,message\n");
    for entry in entries {
        out.push_str(&csv_field(&entry.id));
        out.push(',');
        out.push_str(&entry.timestamp.to_rfc3339());
        out.push(',');
        out.push_str(entry.severity.as_query());
        out.push(',');
        out.push_str(&csv_field(entry.source.as_deref().unwrap_or("")));
        out.push(',');
        out.push_str(&csv_field(&entry.message));
        out.push('\n');
    }
    out
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
