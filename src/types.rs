/// Shared types used across the codebase

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config;

/// Declares a closed set of string values stored in TEXT columns and sent
/// over the wire as the same literal.
#[macro_export]
macro_rules! text_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        $vis enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Every accepted literal, in declaration order
            pub fn values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} value: {}", stringify!($name), other)),
                }
            }
        }

        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <&str as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <&str as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'q> ::sqlx::Encode<'q, ::sqlx::Postgres> for $name {
            fn encode_by_ref(&self, buf: &mut ::sqlx::postgres::PgArgumentBuffer) -> ::sqlx::encode::IsNull {
                <&str as ::sqlx::Encode<'q, ::sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }

        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(value: ::sqlx::postgres::PgValueRef<'r>) -> Result<Self, ::sqlx::error::BoxDynError> {
                let text = <&str as ::sqlx::Decode<'r, ::sqlx::Postgres>>::decode(value)?;
                text.parse::<$name>().map_err(Into::into)
            }
        }
    };
}

text_enum! {
    /// Role discriminant carried in tokens and stored on every account
    pub enum Role {
        User => "user",
        Team => "team",
        Admin => "admin",
        SuperAdmin => "super_admin",
    }
}

impl Role {
    /// Position in the four-level hierarchy, member lowest
    pub fn rank(&self) -> u8 {
        match self {
            Role::User => 0,
            Role::Team => 1,
            Role::Admin => 2,
            Role::SuperAdmin => 3,
        }
    }

    /// Parse the path segment used by the registration endpoints
    pub fn from_registration_path(kind: &str) -> Option<Self> {
        match kind {
            "user" => Some(Role::User),
            "team" => Some(Role::Team),
            "admin" => Some(Role::Admin),
            "super-admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

/// `page`/`limit` query parameters shared by every list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    /// Normalized (page, limit, offset) with config defaults and caps applied
    pub fn resolve(&self) -> (i64, i64, i64) {
        let api = &config::config().api;
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(api.default_page_size)
            .clamp(1, api.max_page_size);
        (page, limit, (page - 1) * limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self { page, limit, total, total_pages }
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp and keeps the date part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

pub fn deserialize_optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", s))),
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Same as [`double_option`] for date fields.
pub fn double_option_date<'de, D>(deserializer: D) -> Result<Option<Option<NaiveDate>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_optional_date(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_rfc3339_dates() {
        let expected = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        assert_eq!(parse_date("2025-12-31"), Some(expected));
        assert_eq!(parse_date("2025-12-31T10:00:00Z"), Some(expected));
        assert_eq!(parse_date("31/12/2025"), None);
    }

    #[test]
    fn pagination_rounds_total_pages_up() {
        assert_eq!(Pagination::new(1, 10, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 10, 10).total_pages, 1);
        assert_eq!(Pagination::new(2, 10, 11).total_pages, 2);
    }

    #[test]
    fn page_query_clamps_to_config() {
        let query = PageQuery { page: Some(0), limit: Some(100_000) };
        let (page, limit, offset) = query.resolve();
        assert_eq!(page, 1);
        assert_eq!(limit, config::config().api.max_page_size);
        assert_eq!(offset, 0);

        let query = PageQuery { page: Some(3), limit: Some(5) };
        assert_eq!(query.resolve(), (3, 5, 10));
    }

    #[test]
    fn role_ordering_and_paths() {
        assert!(Role::SuperAdmin.rank() > Role::Admin.rank());
        assert!(Role::Team.rank() > Role::User.rank());
        assert_eq!(Role::from_registration_path("super-admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::from_registration_path("root"), None);
        assert_eq!(serde_json::to_string(&Role::SuperAdmin).unwrap(), "\"super_admin\"");
        assert_eq!("team".parse::<Role>(), Ok(Role::Team));
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::values(), vec!["user", "team", "admin", "super_admin"]);
    }

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        assigned_to: Option<Option<i64>>,
    }

    #[test]
    fn double_option_distinguishes_null_from_missing() {
        let missing: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.assigned_to, None);
        let null: Patch = serde_json::from_str(r#"{"assigned_to":null}"#).unwrap();
        assert_eq!(null.assigned_to, Some(None));
        let set: Patch = serde_json::from_str(r#"{"assigned_to":7}"#).unwrap();
        assert_eq!(set.assigned_to, Some(Some(7)));
    }
}
