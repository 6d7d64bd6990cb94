use crate::peer::types::{IceServerKind, ServerConfig};
use rand::Rng;

/// Короткий случайный идентификатор для потоков и треков
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Идентификатор RPC вызова
pub fn new_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:", "turns:" или "stun:", возвращаем как есть
    if ["turn:", "turns:", "stun:", "stuns:"]
        .iter()
        .any(|s| config.url.starts_with(s))
    {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = match config.r#type {
            IceServerKind::Turn => "turn:",
            IceServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: IceServerKind, url: &str) -> ServerConfig {
        ServerConfig {
            id: "s".into(),
            r#type: kind,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn test_scheme_added_by_type() {
        assert_eq!(
            add_ice_url_scheme(&server(IceServerKind::Turn, "global.relay.metered.ca:80")),
            "turn:global.relay.metered.ca:80"
        );
        assert_eq!(
            add_ice_url_scheme(&server(IceServerKind::Stun, "stun.relay.metered.ca:80")),
            "stun:stun.relay.metered.ca:80"
        );
    }

    #[test]
    fn test_existing_scheme_kept() {
        let url = "turns:global.relay.metered.ca:443?transport=tcp";
        assert_eq!(add_ice_url_scheme(&server(IceServerKind::Turn, url)), url);
    }

    #[test]
    fn test_ids_unique() {
        assert_ne!(new_call_id(), new_call_id());
        assert_eq!(random_id().len(), 16);
    }
}
