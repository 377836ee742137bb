//! Static topic table consulted after reassembly completes

/// Subscribed bus topics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Topic {
    Config,
    Control,
    Data,
    Settings,
    Status,
    Upgrade,
    ServerStatus,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Config,
        Topic::Control,
        Topic::Data,
        Topic::Settings,
        Topic::Status,
        Topic::Upgrade,
        Topic::ServerStatus,
    ];

    pub const fn path(self) -> &'static str {
        match self {
            Topic::Config => "esp_device/config",
            Topic::Control => "esp_device/control",
            Topic::Data => "esp_device/data",
            Topic::Settings => "esp_device/settings",
            Topic::Status => "esp_device/status",
            Topic::Upgrade => "esp_device/upgrade",
            Topic::ServerStatus => "server/status",
        }
    }

    pub fn from_path(path: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.path() == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_map_back_to_topics() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_path(topic.path()), Some(topic));
        }
    }

    #[test]
    fn test_unknown_path() {
        assert_eq!(Topic::from_path("esp_device/unknown"), None);
        assert_eq!(Topic::from_path(""), None);
    }
}
