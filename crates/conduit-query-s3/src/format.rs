use std::fmt;
use std::str::FromStr;

use conduit_query::{DataError, ParamValue};

use crate::locator::S3Locator;

/// Object file formats recognized during format resolution
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FileFormat {
    Csv,
    Parquet,
    Json,
    Orc,
    Excel,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Parquet => "parquet",
            FileFormat::Json => "json",
            FileFormat::Orc => "orc",
            FileFormat::Excel => "excel",
        }
    }

    /// Recognized name or extension, case-insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "parquet" => Some(FileFormat::Parquet),
            "json" => Some(FileFormat::Json),
            "orc" => Some(FileFormat::Orc),
            "excel" | "xlsx" | "xls" => Some(FileFormat::Excel),
            _ => None,
        }
    }

    /// First call-time parameter, if it names a format; then the locator's
    /// extension; then `default`
    pub fn resolve(params: &[ParamValue], locator: &S3Locator, default: FileFormat) -> Self {
        params
            .first()
            .and_then(ParamValue::as_text)
            .and_then(Self::from_name)
            .or_else(|| locator.extension().and_then(Self::from_name))
            .unwrap_or(default)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| DataError::UnsupportedFormat(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(uri: &str) -> S3Locator {
        S3Locator::parse(uri).unwrap()
    }

    #[test]
    fn test_from_name() {
        assert_eq!(FileFormat::from_name("PARQUET"), Some(FileFormat::Parquet));
        assert_eq!(FileFormat::from_name("xlsx"), Some(FileFormat::Excel));
        assert_eq!(FileFormat::from_name("txt"), None);
        assert!("avro".parse::<FileFormat>().is_err());
    }

    #[test]
    fn test_param_beats_missing_extension() {
        let params = vec![ParamValue::Text("parquet".into())];
        let format = FileFormat::resolve(&params, &locator("s3://b/exports/latest"), FileFormat::Csv);
        assert_eq!(format, FileFormat::Parquet);
    }

    #[test]
    fn test_param_beats_extension() {
        let params = vec![ParamValue::Text("json".into())];
        let format = FileFormat::resolve(&params, &locator("s3://b/x.csv"), FileFormat::Csv);
        assert_eq!(format, FileFormat::Json);
    }

    #[test]
    fn test_unrecognized_param_falls_through() {
        let params = vec![ParamValue::Text("2024".into()), ParamValue::Int(1)];
        let format = FileFormat::resolve(&params, &locator("s3://b/x.parquet"), FileFormat::Csv);
        assert_eq!(format, FileFormat::Parquet);

        let params = vec![ParamValue::Int(7)];
        let format = FileFormat::resolve(&params, &locator("s3://b/data/"), FileFormat::Json);
        assert_eq!(format, FileFormat::Json);
    }

    #[test]
    fn test_default_when_nothing_matches() {
        let format = FileFormat::resolve(&[], &locator("s3://b/notes.txt"), FileFormat::Csv);
        assert_eq!(format, FileFormat::Csv);
    }
}
