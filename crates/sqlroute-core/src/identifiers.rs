//! SQL identifier quoting for the statements handles build themselves
//! (savepoints, truncation).

/// Quote a SQL identifier using MySQL backtick quoting.
///
/// Embedded backticks are escaped by doubling them.
///
/// # Examples
///
/// ```
/// use sqlroute_core::quote_ident_mysql;
///
/// assert_eq!(quote_ident_mysql("users"), "`users`");
/// assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
/// ```
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Strip everything but ASCII alphanumerics and underscores.
///
/// Savepoint names cannot be quoted portably, so they are sanitized instead.
///
/// # Examples
///
/// ```
/// use sqlroute_core::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("sqlroute_sp_1"), "sqlroute_sp_1");
/// assert_eq!(sanitize_identifier("sp;DROP TABLE--"), "spDROPTABLE");
/// ```
#[inline]
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
