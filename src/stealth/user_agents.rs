//! Desktop user-agent pool

use rand::seq::SliceRandom;

/// Desktop Chrome user agents the session picks from when none is configured
pub const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
];

/// Pick a user agent from the pool
pub fn random_desktop_user_agent() -> &'static str {
    DESKTOP_USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

/// `navigator.platform` value consistent with a user agent
pub fn platform_for(user_agent: &str) -> &'static str {
    if user_agent.contains("Windows") {
        "Win32"
    } else if user_agent.contains("Macintosh") {
        "MacIntel"
    } else {
        "Linux x86_64"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_agent_comes_from_pool() {
        for _ in 0..20 {
            assert!(DESKTOP_USER_AGENTS.contains(&random_desktop_user_agent()));
        }
    }

    #[test]
    fn test_platform_matches_agent() {
        assert_eq!(platform_for(DESKTOP_USER_AGENTS[0]), "Win32");
        assert_eq!(platform_for(DESKTOP_USER_AGENTS[3]), "MacIntel");
        assert_eq!(platform_for(DESKTOP_USER_AGENTS[5]), "Linux x86_64");
    }
}
