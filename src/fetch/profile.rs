use rand::seq::SliceRandom;
use rand::Rng;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "de-DE,de;q=0.9,en;q=0.8",
    "en-US,en;q=0.9",
    "fr-FR,fr;q=0.9,en;q=0.8",
    "es-ES,es;q=0.9,en;q=0.8",
];

/// Request identity used by every tier for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserProfile {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
}

/// Fixed tables the per-URL profile is drawn from.
#[derive(Debug, Clone)]
pub struct ProfilePool {
    user_agents: &'static [&'static str],
    accept_languages: &'static [&'static str],
}

impl Default for ProfilePool {
    fn default() -> Self {
        Self {
            user_agents: USER_AGENTS,
            accept_languages: ACCEPT_LANGUAGES,
        }
    }
}

impl ProfilePool {
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> BrowserProfile {
        BrowserProfile {
            user_agent: self.user_agents.choose(rng).copied().unwrap_or(USER_AGENTS[0]),
            accept_language: self
                .accept_languages
                .choose(rng)
                .copied()
                .unwrap_or(ACCEPT_LANGUAGES[0]),
        }
    }
}
