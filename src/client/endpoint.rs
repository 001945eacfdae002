use url::Url;

use crate::config::LocalPlayer;
use crate::core::error::ClientError;
use crate::core::session::RoomCode;

/// Where table sockets live, derived from the site origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
    user_id: String,
    username: String,
}

impl Endpoint {
    /// `http` origins map to `ws`, `https` to `wss`. A bare host is taken as `http`.
    pub fn from_origin(origin: &str, local: &LocalPlayer) -> Result<Self, ClientError> {
        let origin = origin.trim();
        let mut base = if origin.contains("://") {
            Url::parse(origin)?
        } else {
            Url::parse(&format!("http://{origin}"))?
        };

        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ClientError::InvalidOrigin(format!("unsupported scheme {other}"))),
        };
        if base.host_str().is_none() {
            return Err(ClientError::InvalidOrigin(origin.to_string()));
        }
        if scheme == "wss" && !cfg!(feature = "tls") {
            return Err(ClientError::InvalidOrigin(format!(
                "{origin} needs TLS, rebuild with `--features tls`"
            )));
        }
        base.set_scheme(scheme)
            .map_err(|()| ClientError::InvalidOrigin(origin.to_string()))?;
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base, user_id: local.id.to_string(), username: local.name.clone() })
    }

    pub fn is_secure(&self) -> bool {
        self.base.scheme() == "wss"
    }

    pub fn url_for(&self, room: &RoomCode) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("/ws/dice/game/{}/", room.as_str()));
        url.query_pairs_mut()
            .clear()
            .append_pair("user_id", &self.user_id)
            .append_pair("username", &self.username);
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> LocalPlayer {
        LocalPlayer { id: 42, name: "ana maria".into() }
    }

    #[test]
    fn scheme_follows_the_origin() {
        let room = RoomCode::parse("abc1").unwrap();
        let plain = Endpoint::from_origin("http://localhost:8000", &me()).unwrap();
        assert_eq!(
            plain.url_for(&room).as_str(),
            "ws://localhost:8000/ws/dice/game/ABC1/?user_id=42&username=ana+maria"
        );
        assert!(!plain.is_secure());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn secure_origins_map_to_wss() {
        let room = RoomCode::parse("abc1").unwrap();
        let secure = Endpoint::from_origin("https://dice.example.com/lobby?x=1", &me()).unwrap();
        assert!(secure.is_secure());
        assert!(secure
            .url_for(&room)
            .as_str()
            .starts_with("wss://dice.example.com/ws/dice/game/ABC1/?"));
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn secure_origins_need_the_tls_feature() {
        for origin in ["https://dice.example.com", "wss://127.0.0.1:4443"] {
            assert!(
                matches!(Endpoint::from_origin(origin, &me()), Err(ClientError::InvalidOrigin(_))),
                "{origin}"
            );
        }
    }

    #[test]
    fn bare_hosts_default_to_plain_websocket() {
        let endpoint = Endpoint::from_origin("127.0.0.1:4000", &me()).unwrap();
        assert_eq!(endpoint.url_for(&RoomCode::parse("R").unwrap()).scheme(), "ws");
    }

    #[test]
    fn unusable_origins_are_rejected() {
        assert!(matches!(
            Endpoint::from_origin("ftp://example.com", &me()),
            Err(ClientError::InvalidOrigin(_))
        ));
        assert!(Endpoint::from_origin("http://", &me()).is_err());
    }
}
