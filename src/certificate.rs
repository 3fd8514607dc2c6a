use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use crate::io::create_io_file;

#[derive(Debug, Clone)]
pub struct CertificateDetails {
    pub student_name: String,
    pub course_title: String,
    pub instructor: String,
    pub certificate_id: Uuid,
}

/// Certificate id of an enrollment. Stable across retries and distinct
/// from the enrollment id itself.
pub fn certificate_id_for(enrollment: Uuid) -> Uuid {
    Uuid::new_v5(&enrollment, b"certificate")
}

/// Writes certificate artifacts under a single directory, one file per
/// certificate id.
#[derive(Debug, Clone)]
pub struct Certificates {
    dir: PathBuf,
}

impl Certificates {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, certificate_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.txt", certificate_id))
    }

    pub async fn issue(
        &self,
        details: &CertificateDetails,
        issued_at: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let path = self.path_for(details.certificate_id);
        if path.exists() {
            log::info!(
                "Certificate {} already on disk, reusing it",
                details.certificate_id
            );
            return Ok(path.to_string_lossy().into_owned());
        }
        let file = create_io_file(path.clone()).await?;
        let mut writer = BufWriter::new(file);
        writer.write_all(render(details, issued_at).as_bytes()).await?;
        writer.flush().await?;
        log::info!(
            "Issued certificate {} for {} ({})",
            details.certificate_id,
            details.student_name,
            details.course_title
        );
        Ok(path.to_string_lossy().into_owned())
    }
}

fn render(details: &CertificateDetails, issued_at: DateTime<Utc>) -> String {
    format!(
        "CERTIFICATE OF COMPLETION\n\n\
         This certifies that\n\n    {}\n\n\
         has successfully completed\n\n    {}\n\n\
         Instructor: {}\n\
         Issued: {}\n\
         Certificate ID: {}\n",
        details.student_name,
        details.course_title,
        details.instructor,
        issued_at.format("%Y-%m-%d"),
        details.certificate_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn details() -> CertificateDetails {
        CertificateDetails {
            student_name: "Ada Lovelace".to_string(),
            course_title: "Analytical Engines 101".to_string(),
            instructor: "Charles Babbage".to_string(),
            certificate_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn writes_artifact_named_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let certificates = Certificates::new(dir.path());
        let details = details();
        let issued_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();

        let path = certificates.issue(&details, issued_at).await.unwrap();
        assert!(path.ends_with(&format!("{}.txt", details.certificate_id)));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Ada Lovelace"));
        assert!(text.contains("Analytical Engines 101"));
        assert!(text.contains("Instructor: Charles Babbage"));
        assert!(text.contains("Issued: 2026-03-14"));
    }

    #[tokio::test]
    async fn same_id_reuses_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let certificates = Certificates::new(dir.path());
        let details = details();
        let first_day = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let first = certificates.issue(&details, first_day).await.unwrap();
        let again = certificates.issue(&details, Utc::now()).await.unwrap();
        assert_eq!(first, again);

        let text = std::fs::read_to_string(&again).unwrap();
        assert!(text.contains("Issued: 2026-03-14"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn certificate_id_is_stable_per_enrollment() {
        let enrollment = Uuid::new_v4();
        assert_eq!(certificate_id_for(enrollment), certificate_id_for(enrollment));
        assert_ne!(certificate_id_for(enrollment), enrollment);
        assert_ne!(certificate_id_for(enrollment), certificate_id_for(Uuid::new_v4()));
    }
}
