use crate::utils::error::{DeployError, Result};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field_name: &str, value: &str, reason: impl Into<String>) -> DeployError {
    DeployError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// 驗證 git 倉庫位址：URL 或 scp 風格的 `user@host:path`
pub fn validate_repository_url(field_name: &str, repo: &str) -> Result<()> {
    if repo.trim().is_empty() {
        return Err(invalid(field_name, repo, "Repository URL cannot be empty"));
    }

    if repo.chars().any(char::is_whitespace) {
        return Err(invalid(field_name, repo, "Repository URL cannot contain whitespace"));
    }

    match Url::parse(repo) {
        Ok(url) => match url.scheme() {
            "http" | "https" | "ssh" | "git" | "file" => Ok(()),
            scheme => Err(invalid(
                field_name,
                repo,
                format!("Unsupported URL scheme: {}", scheme),
            )),
        },
        Err(_) if is_scp_like(repo) => Ok(()),
        Err(e) => Err(invalid(
            field_name,
            repo,
            format!("Invalid repository URL: {}", e),
        )),
    }
}

fn is_scp_like(repo: &str) -> bool {
    match repo.split_once(':') {
        Some((host_part, path)) => {
            let host = host_part.rsplit('@').next().unwrap_or(host_part);
            !host.is_empty() && !path.is_empty() && !host_part.contains('/')
        }
        None => false,
    }
}

/// 驗證 git 分支名稱
pub fn validate_branch_name(field_name: &str, branch: &str) -> Result<()> {
    validate_non_empty_string(field_name, branch)?;

    if branch.starts_with('-') {
        return Err(invalid(field_name, branch, "Branch name cannot start with '-'"));
    }

    if branch.chars().any(|c| c.is_whitespace() || c.is_control()) || branch.contains("..") {
        return Err(invalid(
            field_name,
            branch,
            "Branch name contains characters git does not allow",
        ));
    }

    Ok(())
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid(field_name, path, "Path cannot be empty"));
    }

    if path.contains('\0') {
        return Err(invalid(field_name, path, "Path contains null bytes"));
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(invalid(
            field_name,
            &value.to_string(),
            format!("Value must be at least {}", min_value),
        ));
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(
            field_name,
            value,
            "Value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(
            field_name,
            &value.to_string(),
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

/// 服務名稱只允許 ASCII 字母數字、`-`、`_`
pub fn validate_service_name(field_name: &str, name: &str) -> Result<()> {
    validate_non_empty_string(field_name, name)?;

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(
            field_name,
            name,
            "Only ASCII letters, digits, '-' and '_' are allowed",
        ));
    }
    Ok(())
}

/// PostgreSQL 識別字（資料庫名、角色名）
pub fn validate_sql_identifier(field_name: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');

    if !valid_start
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        || value.len() > 63
    {
        return Err(invalid(
            field_name,
            value,
            "Must start with a letter or '_' and contain at most 63 letters, digits, '_' or '-'",
        ));
    }
    Ok(())
}

/// nginx server_name 不能含有會破壞設定檔結構的字元
pub fn validate_domain(field_name: &str, domain: &str) -> Result<()> {
    validate_non_empty_string(field_name, domain)?;

    if domain
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, ';' | '{' | '}' | '/' | '"' | '\''))
    {
        return Err(invalid(
            field_name,
            domain,
            "Domain cannot contain whitespace, quotes, ';', '{', '}' or '/'",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_repository_url() {
        assert!(validate_repository_url("repository_url", "https://github.com/acme/shop.git").is_ok());
        assert!(validate_repository_url("repository_url", "ssh://git@github.com/acme/shop.git").is_ok());
        assert!(validate_repository_url("repository_url", "git@github.com:acme/shop.git").is_ok());
        assert!(validate_repository_url("repository_url", "file:///srv/repos/shop").is_ok());
        assert!(validate_repository_url("repository_url", "").is_err());
        assert!(validate_repository_url("repository_url", "ftp://example.com/shop").is_err());
        assert!(validate_repository_url("repository_url", "not a url").is_err());
    }

    #[test]
    fn test_validate_branch_name() {
        assert!(validate_branch_name("branch", "feature/login").is_ok());
        assert!(validate_branch_name("branch", "--upload-pack=x").is_err());
        assert!(validate_branch_name("branch", "a..b").is_err());
        assert!(validate_branch_name("branch", " ").is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("workers", 2, 1).is_ok());
        assert!(validate_positive_number("workers", 0, 1).is_err());
    }

    #[test]
    fn test_validate_service_name() {
        assert!(validate_service_name("services[0].name", "celery_worker-1").is_ok());
        assert!(validate_service_name("services[0].name", "web app").is_err());
        assert!(validate_service_name("services[0].name", "").is_err());
    }

    #[test]
    fn test_validate_sql_identifier() {
        assert!(validate_sql_identifier("database.name", "shop_main").is_ok());
        assert!(validate_sql_identifier("database.name", "shop-feature-x").is_ok());
        assert!(validate_sql_identifier("database.name", "1shop").is_err());
        assert!(validate_sql_identifier("database.name", "shop\"; DROP").is_err());
    }

    #[test]
    fn test_validate_domain() {
        assert!(validate_domain("domain", "shop-main").is_ok());
        assert!(validate_domain("domain", "shop.example.com").is_ok());
        assert!(validate_domain("domain", "evil; include /etc").is_err());
    }
}
