use crate::config::settings::SecurityConfig;
use crate::error::GatewayError;

/// 共享密钥与诊断令牌校验。服务端任一值未配置时一律拒绝（fail closed）。
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    security_key: Option<String>,
    log_access_token: Option<String>,
}

fn matches(expected: Option<&str>, provided: Option<&str>) -> bool {
    match (expected, provided) {
        (Some(expected), Some(provided)) if !expected.is_empty() && !provided.is_empty() => {
            expected == provided
        }
        _ => false,
    }
}

impl AccessGuard {
    pub fn new(cfg: &SecurityConfig) -> Self {
        Self {
            security_key: cfg.security_key.clone(),
            log_access_token: cfg.log_access_token.clone(),
        }
    }

    pub fn authorize(&self, provided: Option<&str>) -> bool {
        matches(self.security_key.as_deref(), provided)
    }

    pub fn authorize_diagnostics(&self, access_token: Option<&str>) -> bool {
        matches(self.log_access_token.as_deref(), access_token)
    }

    pub fn require(&self, provided: Option<&str>) -> Result<(), GatewayError> {
        if self.authorize(provided) {
            Ok(())
        } else {
            Err(GatewayError::Forbidden)
        }
    }

    pub fn require_diagnostics(&self, access_token: Option<&str>) -> Result<(), GatewayError> {
        if self.authorize_diagnostics(access_token) {
            Ok(())
        } else {
            Err(GatewayError::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(key: Option<&str>, token: Option<&str>) -> AccessGuard {
        AccessGuard::new(&SecurityConfig {
            security_key: key.map(str::to_string),
            log_access_token: token.map(str::to_string),
        })
    }

    #[test]
    fn exact_match_only() {
        let g = guard(Some("s3cret"), None);
        assert!(g.authorize(Some("s3cret")));
        assert!(!g.authorize(Some("s3cret ")));
        assert!(!g.authorize(Some("S3CRET")));
        assert!(!g.authorize(None));
    }

    #[test]
    fn unset_or_empty_server_values_fail_closed() {
        let g = guard(None, None);
        assert!(!g.authorize(None));
        assert!(!g.authorize(Some("")));
        assert!(!g.authorize_diagnostics(None));

        let g = guard(Some(""), Some(""));
        assert!(!g.authorize(Some("")));
        assert!(!g.authorize_diagnostics(Some("")));
    }

    #[test]
    fn diagnostics_token_is_independent_of_secret() {
        let g = guard(Some("s3cret"), Some("logtoken"));
        assert!(g.authorize_diagnostics(Some("logtoken")));
        assert!(!g.authorize_diagnostics(Some("s3cret")));
        assert!(matches!(
            g.require_diagnostics(Some("nope")),
            Err(GatewayError::Forbidden)
        ));
        assert!(g.require(Some("s3cret")).is_ok());
    }
}
