//! Typed attribute and text values
//!
//! Attributes are stored as strings exactly as they appeared in the source.
//! [`AttrValue`] converts between that text and Rust types, and defines the
//! canonical form written back when a value is set: dates as `%Y-%m-%d`,
//! date-times as `%Y-%m-%dT%H:%M:%S`, booleans as lowercase `true`/`false`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Canonical date format
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Canonical date-time format
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A type that can be read from and written to attribute text
pub trait AttrValue: Sized {
    /// Name used in coercion errors
    const TYPE_NAME: &'static str;

    /// Parse from the stored text, returning the reason on failure
    fn parse_value(text: &str) -> std::result::Result<Self, String>;

    /// Canonical text form
    fn to_value(&self) -> String;
}

/// Coerce stored text, naming the field in the error
pub fn coerce<T: AttrValue>(field: &str, text: &str) -> crate::error::Result<T> {
    T::parse_value(text).map_err(|reason| Error::coercion(field, text, T::TYPE_NAME, reason))
}

impl AttrValue for String {
    const TYPE_NAME: &'static str = "string";

    fn parse_value(text: &str) -> std::result::Result<Self, String> {
        Ok(text.to_string())
    }

    fn to_value(&self) -> String {
        self.clone()
    }
}

macro_rules! numeric_attr_value {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl AttrValue for $ty {
                const TYPE_NAME: &'static str = $name;

                fn parse_value(text: &str) -> std::result::Result<Self, String> {
                    text.trim().parse::<$ty>().map_err(|e| e.to_string())
                }

                fn to_value(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

numeric_attr_value! {
    i32 => "integer",
    i64 => "integer",
    u32 => "non-negative integer",
    u64 => "non-negative integer",
    usize => "non-negative integer",
}

impl AttrValue for f64 {
    const TYPE_NAME: &'static str = "float";

    fn parse_value(text: &str) -> std::result::Result<Self, String> {
        let value: f64 = text.trim().parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err("value is not finite".to_string())
        }
    }

    fn to_value(&self) -> String {
        self.to_string()
    }
}

impl AttrValue for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn parse_value(text: &str) -> std::result::Result<Self, String> {
        match text.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other if other.eq_ignore_ascii_case("true") => Ok(true),
            other if other.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err("expected true or false".to_string()),
        }
    }

    fn to_value(&self) -> String {
        let text = if *self { "true" } else { "false" };
        text.to_string()
    }
}

impl AttrValue for NaiveDate {
    const TYPE_NAME: &'static str = "date";

    fn parse_value(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .or_else(|_| NaiveDateTime::parse_value(text).map(|dt| dt.date()))
            .map_err(|_| format!("expected {}", DATE_FORMAT))
    }

    fn to_value(&self) -> String {
        self.format(DATE_FORMAT).to_string()
    }
}

impl AttrValue for NaiveDateTime {
    const TYPE_NAME: &'static str = "date-time";

    fn parse_value(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(dt.naive_utc());
        }
        NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
            .map_err(|e| e.to_string())
    }

    fn to_value(&self) -> String {
        self.format(DATETIME_FORMAT).to_string()
    }
}

impl AttrValue for DateTime<Utc> {
    const TYPE_NAME: &'static str = "date-time";

    fn parse_value(text: &str) -> std::result::Result<Self, String> {
        NaiveDateTime::parse_value(text).map(|dt| dt.and_utc())
    }

    fn to_value(&self) -> String {
        self.naive_utc().to_value()
    }
}

/// Declares a closed set of attribute tokens as a Rust enum
macro_rules! token_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident => $token:literal),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $token)] $variant),*
        }

        impl $name {
            /// Every token in declaration order
            pub const TOKENS: &'static [&'static str] = &[$($token),*];

            /// The token written to XML
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),*
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, String> {
                match s.trim() {
                    $($token => Ok($name::$variant),)*
                    other => Err(format!("'{}' is not one of: {}", other, Self::TOKENS.join(", "))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AttrValue for $name {
            const TYPE_NAME: &'static str = stringify!($name);

            fn parse_value(text: &str) -> std::result::Result<Self, String> {
                text.parse()
            }

            fn to_value(&self) -> String {
                self.as_str().to_string()
            }
        }
    };
}

token_enum! {
    /// Kind of payload a dataset points at
    pub enum DatasetType {
        /// Raster grid
        Raster => "Raster",
        /// Vector layer
        Vector => "Vector",
        /// GeoPackage container
        Geopackage => "Geopackage",
        /// Digital elevation model
        Dem => "DEM",
        /// Hillshade raster
        HillShade => "HillShade",
        /// Generic file
        File => "File",
        /// SQLite database
        SqliteDb => "SQLiteDB",
        /// Comma separated values
        Csv => "CSV",
        /// Run log
        LogFile => "LogFile",
        /// Configuration file
        ConfigFile => "ConfigFile",
        /// HTML report
        HtmlFile => "HTMLFile",
        /// PDF document
        Pdf => "PDF",
    }
}

token_enum! {
    /// Declared type of a metadata value
    pub enum MetaType {
        /// Plain string
        String => "string",
        /// Integer
        Int => "int",
        /// Floating point
        Float => "float",
        /// Rich text
        RichText => "richtext",
        /// Markdown
        Markdown => "markdown",
        /// JSON blob
        Json => "json",
        /// URL
        Url => "url",
        /// File path
        FilePath => "filepath",
        /// GUID
        Guid => "guid",
        /// Image link
        Image => "image",
        /// Video link
        Video => "video",
        /// ISO date
        IsoDate => "isodate",
        /// Timestamp
        Timestamp => "timestamp",
        /// Boolean
        Boolean => "boolean",
        /// Hidden from viewers
        Hidden => "hidden",
    }
}
