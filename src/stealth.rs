//! Browser identity & anti-automation hardening.
//!
//! Every rendering session is launched with the same versioned [`BrowserIdentity`]:
//! a desktop Chrome user-agent, matching locale/platform hints, launch flags that
//! hide the automation banner, and an injection script that runs before any page
//! script (via `Page.addScriptToEvaluateOnNewDocument`).

/// Fixed identity presented by every rendering session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserIdentity {
    /// Bumped whenever any field or the injection script changes
    pub version: u32,
    pub user_agent: &'static str,
    pub accept_language: &'static str,
    pub platform: &'static str,
    pub window_size: (u32, u32),
}

/// Desktop Chrome on Windows.
pub const DESKTOP_CHROME: BrowserIdentity = BrowserIdentity {
    version: 1,
    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    accept_language: "en-US,en;q=0.9",
    platform: "Win32",
    window_size: (1920, 1080),
};

impl Default for BrowserIdentity {
    fn default() -> Self {
        DESKTOP_CHROME
    }
}

impl BrowserIdentity {
    /// Chrome command-line flags for this identity.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--disable-blink-features=AutomationControlled",
            "--no-sandbox",
            "--disable-setuid-sandbox",
            "--disable-dev-shm-usage",
            "--disable-infobars",
            "--disable-gpu",
            "--no-first-run",
            "--window-position=0,0",
            "--ignore-certificate-errors",
            "--incognito",
        ]
        .iter()
        .map(|flag| flag.to_string())
        .collect();

        args.push(format!("--user-agent={}", self.user_agent));
        args.push(format!("--lang={}", self.primary_language()));
        args
    }

    /// `en-US` out of `en-US,en;q=0.9`.
    pub fn primary_language(&self) -> &'static str {
        self.accept_language
            .split(',')
            .next()
            .unwrap_or(self.accept_language)
    }

    /// Script injected into every new document of the session.
    pub fn injection_script(&self) -> String {
        STEALTH_JS
            .replace("__PLATFORM__", self.platform)
            .replace("__LANGUAGE__", self.primary_language())
    }
}

const STEALTH_JS: &str = r#"
    // ============================================================================
    // 🛡️ AUTOMATION SURFACE
    // ============================================================================

    // navigator.webdriver must read as absent, not `true`
    Object.defineProperty(Navigator.prototype, 'webdriver', {
        get: () => undefined,
        configurable: true,
    });

    // Headless Chrome ships without window.chrome
    if (!window.chrome) {
        window.chrome = {};
    }
    if (!window.chrome.runtime) {
        window.chrome.runtime = {
            connect: function() {
                return {
                    onMessage: { addListener: function() {}, removeListener: function() {} },
                    postMessage: function() {},
                    disconnect: function() {}
                };
            },
            sendMessage: function() {},
        };
    }

    // Notifications permission answers like a real profile instead of 'prompt'
    if (window.navigator.permissions && window.navigator.permissions.query) {
        const originalQuery = window.navigator.permissions.query.bind(window.navigator.permissions);
        window.navigator.permissions.query = (parameters) => (
            parameters && parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters)
        );
    }

    // ============================================================================
    // 🎭 ORDINARY DESKTOP FINGERPRINT
    // ============================================================================

    Object.defineProperty(navigator, 'platform', { get: () => '__PLATFORM__' });
    Object.defineProperty(navigator, 'languages', { get: () => ['__LANGUAGE__', 'en'] });
    Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 8 });
    Object.defineProperty(navigator, 'deviceMemory', { get: () => 8 });

    // Empty plugin list is a headless tell
    Object.defineProperty(navigator, 'plugins', {
        get: () => {
            const pdf = {
                0: { type: "application/x-google-chrome-pdf", suffixes: "pdf", description: "Portable Document Format" },
                description: "Portable Document Format",
                filename: "internal-pdf-viewer",
                length: 1,
                name: "Chrome PDF Plugin"
            };
            const plugins = [pdf, pdf, pdf];
            Object.setPrototypeOf(plugins, PluginArray.prototype);
            return plugins;
        }
    });

    // WebGL vendor/renderer report a real GPU instead of SwiftShader
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter.apply(this, [parameter]);
    };
"#;
