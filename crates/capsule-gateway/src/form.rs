//! Multipart intake form and send-time parsing.

use axum::extract::Multipart;
use capsule_scheduler::{CapsuleDraft, DraftAttachment};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

use crate::error::ApiError;

/// Raw fields of a `POST /api/capsules` request.
#[derive(Debug, Default, Clone)]
pub struct CapsuleForm {
    pub recipient_email: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub send_datetime: Option<String>,
    /// (client filename, bytes)
    pub attachment: Option<(String, Vec<u8>)>,
}

impl CapsuleForm {
    /// Collect the known fields from a multipart body; unknown fields are
    /// skipped.
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Malformed form data: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "attachment" {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read attachment: {e}")))?;
                form.attachment = Some((filename, bytes.to_vec()));
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read field '{name}': {e}")))?;
            match name.as_str() {
                "recipient_email" => form.recipient_email = Some(value),
                "subject" => form.subject = Some(value),
                "body" => form.body = Some(value),
                "send_datetime" => form.send_datetime = Some(value),
                other => tracing::debug!("Ignoring unknown form field '{other}'"),
            }
        }
        Ok(form)
    }

    /// Validate the form into a draft due strictly after `now`.
    pub fn into_draft(
        self,
        now: DateTime<Utc>,
        local_offset: FixedOffset,
    ) -> Result<CapsuleDraft, ApiError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let (Some(recipient), Some(subject), Some(body), Some(send_datetime)) = (
            non_empty(self.recipient_email),
            non_empty(self.subject),
            non_empty(self.body),
            non_empty(self.send_datetime),
        ) else {
            tracing::warn!("Missing required fields in capsule creation");
            return Err(ApiError::bad_request("Missing required fields"));
        };

        let due_at = parse_send_datetime(&send_datetime, local_offset)?;
        if due_at <= now {
            tracing::warn!("Rejected send time {} which is not in the future", due_at.to_rfc3339());
            return Err(ApiError::bad_request("send_datetime must be in the future"));
        }

        let attachment = match self.attachment {
            Some((filename, _)) if filename.trim().is_empty() => {
                return Err(ApiError::bad_request("No selected file for attachment"));
            }
            Some((filename, bytes)) => Some(DraftAttachment { filename, bytes }),
            None => None,
        };

        Ok(CapsuleDraft {
            recipient: recipient.trim().to_string(),
            subject,
            body,
            due_at,
            attachment,
        })
    }
}

/// Parse an RFC 3339 instant, or a zone-less `YYYY-MM-DDTHH:MM[:SS]` taken to
/// be in `local_offset`.
pub fn parse_send_datetime(
    value: &str,
    local_offset: FixedOffset,
) -> Result<DateTime<Utc>, ApiError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(|| {
            tracing::error!("Could not parse send_datetime: {value}");
            ApiError::bad_request("Invalid send_datetime format. Use YYYY-MM-DDTHH:MM or RFC 3339.")
        })?;

    local_offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ApiError::bad_request("Ambiguous send_datetime"))
}

/// Offset for naive send times; out-of-range values fall back to UTC.
pub fn local_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| {
        tracing::warn!("Invalid local UTC offset of {minutes} minutes, using UTC");
        Utc.fix()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::Duration;

    fn utc() -> FixedOffset {
        local_offset(0)
    }

    fn form(send: &str) -> CapsuleForm {
        CapsuleForm {
            recipient_email: Some(" future@example.com ".into()),
            subject: Some("Hi".into()),
            body: Some("Later".into()),
            send_datetime: Some(send.into()),
            attachment: None,
        }
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let dt = parse_send_datetime("2031-01-01T09:00:00+02:00", utc()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2031-01-01T07:00:00+00:00");
    }

    #[test]
    fn test_parse_naive_uses_local_offset() {
        let dt = parse_send_datetime("2031-01-01T09:00", local_offset(120)).unwrap();
        assert_eq!(dt.to_rfc3339(), "2031-01-01T07:00:00+00:00");
        let dt = parse_send_datetime("2031-01-01 09:00:30", utc()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2031-01-01T09:00:30+00:00");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_send_datetime("next tuesday", utc()).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_local_offset_out_of_range_is_utc() {
        assert_eq!(local_offset(100_000), Utc.fix());
    }

    #[test]
    fn test_into_draft() {
        let now = Utc::now();
        let send = (now + Duration::hours(1)).to_rfc3339();
        let draft = form(&send).into_draft(now, utc()).unwrap();
        assert_eq!(draft.recipient, "future@example.com");
        assert!(draft.due_at > now);
        assert!(draft.attachment.is_none());
    }

    #[test]
    fn test_into_draft_rejects_past_and_missing() {
        let now = Utc::now();
        let past = (now - Duration::minutes(1)).to_rfc3339();
        assert!(form(&past).into_draft(now, utc()).is_err());

        let mut missing = form(&(now + Duration::hours(1)).to_rfc3339());
        missing.subject = None;
        let err = missing.into_draft(now, utc()).unwrap_err();
        assert_eq!(err.detail, "Missing required fields");
    }

    #[test]
    fn test_into_draft_rejects_unnamed_attachment() {
        let now = Utc::now();
        let mut f = form(&(now + Duration::hours(1)).to_rfc3339());
        f.attachment = Some((String::new(), vec![1, 2, 3]));
        let err = f.into_draft(now, utc()).unwrap_err();
        assert_eq!(err.detail, "No selected file for attachment");
    }
}
