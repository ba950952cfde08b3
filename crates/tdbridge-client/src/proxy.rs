use serde_json::{Map, Value, json};
use tdbridge_core::Command;

/// Proxy protocol and its credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyKind {
    MtProto {
        secret: String,
    },
    Socks5 {
        username: String,
        password: String,
    },
    Http {
        username: String,
        password: String,
    },
}

impl ProxyKind {
    /// Engine `proxyType*` object; empty credentials are omitted.
    pub fn type_object(&self) -> Value {
        let mut object = Map::new();
        let (type_name, fields): (&str, Vec<(&str, &str)>) = match self {
            Self::MtProto { secret } => ("proxyTypeMtproto", vec![("secret", secret.as_str())]),
            Self::Socks5 { username, password } => (
                "proxyTypeSocks5",
                vec![("username", username.as_str()), ("password", password.as_str())],
            ),
            Self::Http { username, password } => (
                "proxyTypeHttp",
                vec![("username", username.as_str()), ("password", password.as_str())],
            ),
        };

        object.insert("@type".to_owned(), Value::String(type_name.to_owned()));
        for (key, value) in fields {
            if !value.is_empty() {
                object.insert(key.to_owned(), Value::String(value.to_owned()));
            }
        }
        Value::Object(object)
    }
}

/// Intermediary the engine should connect through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub server: String,
    pub port: u16,
    pub kind: ProxyKind,
}

impl ProxyConfig {
    pub fn new(server: impl Into<String>, port: u16, kind: ProxyKind) -> Self {
        Self {
            server: server.into(),
            port,
            kind,
        }
    }

    /// `addProxy` command enabling this proxy.
    pub fn add_proxy_command(&self) -> Command {
        Command::with_params(
            "addProxy",
            json!({
                "server": self.server,
                "port": self.port,
                "enable": true,
                "type": self.kind.type_object(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtproto_carries_secret() {
        let kind = ProxyKind::MtProto {
            secret: "ee00".to_owned(),
        };
        assert_eq!(
            kind.type_object(),
            json!({"@type": "proxyTypeMtproto", "secret": "ee00"})
        );
    }

    #[test]
    fn empty_credentials_are_omitted() {
        let kind = ProxyKind::Socks5 {
            username: "alice".to_owned(),
            password: String::new(),
        };
        assert_eq!(
            kind.type_object(),
            json!({"@type": "proxyTypeSocks5", "username": "alice"})
        );

        let http = ProxyKind::Http {
            username: String::new(),
            password: String::new(),
        };
        assert_eq!(http.type_object(), json!({"@type": "proxyTypeHttp"}));
    }

    #[test]
    fn add_proxy_command_enables_proxy() {
        let proxy = ProxyConfig::new(
            "proxy.example.org",
            1080,
            ProxyKind::Socks5 {
                username: "u".to_owned(),
                password: "p".to_owned(),
            },
        );
        let payload = proxy.add_proxy_command().into_payload("setProxy");

        assert_eq!(payload["@type"], "addProxy");
        assert_eq!(payload["server"], "proxy.example.org");
        assert_eq!(payload["port"], 1080);
        assert_eq!(payload["enable"], true);
        assert_eq!(payload["type"]["@type"], "proxyTypeSocks5");
        assert_eq!(payload["@extra"]["request_id"], "setProxy");
    }
}
