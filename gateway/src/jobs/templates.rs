use std::io;
use std::path::Path;

use shared_types::TemplateInfo;

use crate::config::WorkerScripts;

/// Template scripts available to render jobs, sorted by file name.
///
/// A template is any `.py` in the work root that isn't one of the worker
/// entry points, a wrapper or a test.
pub async fn list_templates(root: &Path, workers: &WorkerScripts) -> io::Result<Vec<TemplateInfo>> {
    let mut templates = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(filename) = entry.file_name().into_string() else {
            continue;
        };
        if !entry.file_type().await?.is_file() || !is_template_name(&filename, workers) {
            continue;
        }
        templates.push(TemplateInfo {
            display_name: display_name(&filename),
            filename,
        });
    }
    templates.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(templates)
}

pub fn is_template_name(filename: &str, workers: &WorkerScripts) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.ends_with(".py")
        && !lower.contains("wrapper")
        && !lower.contains("test")
        && !lower.starts_with('_')
        && filename != workers.render
        && filename != workers.combine
        && filename != workers.link_generate
        && filename != workers.email
        && filename != workers.otp
}

fn display_name(filename: &str) -> String {
    filename
        .trim_end_matches(".py")
        .replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_only_templates() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [
            "SPH_Fresh.py",
            "JPH_Fresh.py",
            "pdf_generator_wrapper.py",
            "combine_pdfs.py",
            "generate_sms_links.py",
            "send_otp_email.py",
            "brevo_email_service.py",
            "test_render.py",
            "README.md",
        ] {
            std::fs::write(tmp.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(tmp.path().join("folder.py")).unwrap();

        let found = list_templates(tmp.path(), &WorkerScripts::default())
            .await
            .unwrap();
        let names: Vec<&str> = found.iter().map(|t| t.filename.as_str()).collect();
        assert_eq!(names, vec!["JPH_Fresh.py", "SPH_Fresh.py"]);
        assert_eq!(found[1].display_name, "SPH Fresh");
    }
}
