//! Public web apps used for E2E builds

/// A site with a reachable web app manifest
#[derive(Debug, Clone)]
pub struct TestSiteFixture {
    pub url: &'static str,
    pub manifest_url: &'static str,
    pub should_build: bool,
    pub description: &'static str,
}

pub const TEST_FIXTURES: &[TestSiteFixture] = &[
    TestSiteFixture {
        url: "https://squoosh.app",
        manifest_url: "https://squoosh.app/manifest.json",
        should_build: true,
        description: "Image compressor with a complete manifest",
    },
    TestSiteFixture {
        url: "https://app.diagrams.net",
        manifest_url: "https://app.diagrams.net/images/manifest.json",
        should_build: true,
        description: "Large app, manifest under a subdirectory",
    },
    TestSiteFixture {
        url: "https://example.com",
        manifest_url: "https://example.com/manifest.json",
        should_build: false,
        description: "No manifest; the build must fail with the generic message",
    },
];
