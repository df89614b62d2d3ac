//! URL mappings, rewrite rules and sitemap generation.

pub mod audit;

pub use audit::{audit_html, audit_site, AuditFinding, AuditLevel, PageAudit, SiteAudit};

use crate::config::MigrationDefaults;
use crate::pipeline::parse_date;
use crate::record::TargetRecord;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write as _;
use tracing::info;

/// Old and new public location of one migrated record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlMapping {
    pub record_id: u64,
    pub locale: String,
    pub old_url: String,
    pub new_url: String,
    pub old_path: String,
    pub new_path: String,
}

/// Builds mappings and artifacts between two public site bases.
#[derive(Debug, Clone)]
pub struct RedirectGenerator {
    old_base: String,
    new_base: String,
    default_locale: String,
}

impl RedirectGenerator {
    pub fn new(old_base: impl Into<String>, new_base: impl Into<String>) -> Self {
        Self {
            old_base: trim_base(old_base.into()),
            new_base: trim_base(new_base.into()),
            default_locale: MigrationDefaults::DEFAULT_LOCALE.to_string(),
        }
    }

    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = locale.into();
        self
    }

    fn locale_of<'a>(&'a self, record: &'a TargetRecord) -> &'a str {
        record
            .locale
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&self.default_locale)
    }

    /// One mapping per record carrying a back-reference.
    pub fn build_mappings(&self, records: &[TargetRecord]) -> Vec<UrlMapping> {
        let mappings: Vec<UrlMapping> = records
            .iter()
            .filter_map(|record| {
                let record_id = record.external_id?;
                let locale = self.locale_of(record).to_string();
                let path = article_path(&locale, &record.slug);
                Some(UrlMapping {
                    record_id,
                    old_url: format!("{}{}", self.old_base, path),
                    new_url: format!("{}{}", self.new_base, path),
                    old_path: path.clone(),
                    new_path: path,
                    locale,
                })
            })
            .collect();
        info!("Built {} URL mappings", mappings.len());
        mappings
    }

    /// Apache and Nginx permanent redirects for the same mapping list.
    ///
    /// The destination is a bare path when both bases share an origin and
    /// the absolute new URL otherwise. Same-origin mappings whose paths are
    /// equal are left out since they would redirect to themselves.
    pub fn emit_redirects(&self, mappings: &[UrlMapping]) -> String {
        let same_origin = self.old_base == self.new_base;
        let rules: Vec<(String, &str)> = mappings
            .iter()
            .filter(|m| !(same_origin && m.old_path == m.new_path))
            .map(|m| {
                let destination = if same_origin { m.new_path.as_str() } else { m.new_url.as_str() };
                (regex::escape(m.old_path.trim_start_matches('/')), destination)
            })
            .collect();

        let mut out = String::new();
        let _ = writeln!(out, "# Permanent redirects for migrated articles ({} rules)", rules.len());
        let _ = writeln!(out);
        let _ = writeln!(out, "# Apache (.htaccess)");
        let _ = writeln!(out, "RewriteEngine On");
        for (pattern, destination) in &rules {
            let _ = writeln!(out, "RewriteRule ^{pattern}$ {destination} [R=301,L]");
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "# Nginx");
        for (pattern, destination) in &rules {
            let _ = writeln!(out, "rewrite ^/{pattern}$ {destination} permanent;");
        }
        out
    }

    /// Sitemap for the new site: the root plus one entry per record.
    pub fn emit_sitemap(&self, records: &[TargetRecord], generated_on: NaiveDate) -> String {
        let mut out = String::new();
        let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        let _ = writeln!(out, r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">"#);
        push_url(&mut out, &format!("{}/", self.new_base), generated_on, "daily", "1.0");

        for record in records {
            let location = format!(
                "{}{}",
                self.new_base,
                article_path(self.locale_of(record), &record.slug)
            );
            let lastmod = [&record.modified_at, &record.published_at]
                .into_iter()
                .flatten()
                .find_map(|raw| parse_date(raw))
                .map(|dt| dt.date_naive())
                .unwrap_or(generated_on);
            push_url(&mut out, &location, lastmod, "weekly", "0.8");
        }

        let _ = writeln!(out, "</urlset>");
        out
    }
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}

fn article_path(locale: &str, slug: &str) -> String {
    format!("/{locale}/articles/{slug}")
}

fn push_url(out: &mut String, location: &str, lastmod: NaiveDate, changefreq: &str, priority: &str) {
    let _ = writeln!(out, "  <url>");
    let _ = writeln!(out, "    <loc>{}</loc>", escape_xml(location));
    let _ = writeln!(out, "    <lastmod>{}</lastmod>", lastmod.format("%Y-%m-%d"));
    let _ = writeln!(out, "    <changefreq>{changefreq}</changefreq>");
    let _ = writeln!(out, "    <priority>{priority}</priority>");
    let _ = writeln!(out, "  </url>");
}

pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(external_id: Option<u64>, slug: &str, locale: Option<&str>) -> TargetRecord {
        TargetRecord {
            id: Some(1),
            external_id,
            title: slug.to_string(),
            slug: slug.to_string(),
            locale: locale.map(String::from),
            modified_at: Some("2024-05-06T10:00:00Z".into()),
            ..TargetRecord::default()
        }
    }

    fn generator() -> RedirectGenerator {
        RedirectGenerator::new("https://old.example.com/", "https://www.example.com")
    }

    #[test]
    fn test_mappings_skip_records_without_back_reference() {
        let mappings = generator().build_mappings(&[
            record(Some(4), "busbar-guide", Some("en")),
            record(None, "stray", Some("en")),
            record(Some(5), "intro", None),
        ]);

        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].old_url, "https://old.example.com/en/articles/busbar-guide");
        assert_eq!(mappings[0].new_url, "https://www.example.com/en/articles/busbar-guide");
        assert_eq!(mappings[1].locale, "zh-CN");
    }

    #[test]
    fn test_redirects_cover_both_servers() {
        let generator = generator();
        let mappings = generator.build_mappings(&[record(Some(4), "a.b", Some("en"))]);
        let rules = generator.emit_redirects(&mappings);

        assert!(rules.contains(r"RewriteRule ^en/articles/a\.b$ https://www.example.com/en/articles/a.b [R=301,L]"));
        assert!(rules.contains(r"rewrite ^/en/articles/a\.b$ https://www.example.com/en/articles/a.b permanent;"));
    }

    #[test]
    fn test_same_origin_identical_paths_emit_no_rules() {
        let generator = RedirectGenerator::new("https://www.example.com", "https://www.example.com/");
        let mappings = generator.build_mappings(&[record(Some(4), "a", Some("en"))]);
        let rules = generator.emit_redirects(&mappings);

        assert!(!rules.contains("RewriteRule"));
        assert!(!rules.contains("permanent;"));
    }

    #[test]
    fn test_sitemap_entries() {
        let generated = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut with_amp = record(Some(7), "r&d", Some("en"));
        with_amp.modified_at = None;
        with_amp.published_at = Some("2023-01-02".into());

        let xml = generator().emit_sitemap(&[record(Some(4), "guide", Some("en")), with_amp], generated);

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert_eq!(xml.matches("<url>").count(), 3);
        assert!(xml.contains("<loc>https://www.example.com/</loc>\n    <lastmod>2024-06-01</lastmod>\n    <changefreq>daily</changefreq>\n    <priority>1.0</priority>"));
        assert!(xml.contains("<lastmod>2024-05-06</lastmod>\n    <changefreq>weekly</changefreq>\n    <priority>0.8</priority>"));
        assert!(xml.contains("<loc>https://www.example.com/en/articles/r&amp;d</loc>\n    <lastmod>2023-01-02</lastmod>"));
        assert!(xml.trim_end().ends_with("</urlset>"));
    }
}
