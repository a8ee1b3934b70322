//! JSON bodies of the Dysms RPC API.

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::message::{MessageStatus, StatusResponse};

pub(super) const OK: &str = "OK";

/// Fields every response carries. Error responses (any HTTP status) use the
/// same envelope.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Envelope {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub recommend: Option<String>,
}

impl Envelope {
    pub fn is_ok(&self) -> bool {
        self.code == OK
    }

    /// The message with the diagnosis hint appended, when one is given.
    pub fn describe(&self) -> String {
        match self.recommend.as_deref().filter(|r| !r.is_empty()) {
            Some(hint) => format!("{} (recommend: {})", self.message, hint),
            None => self.message.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SendSmsBody {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub biz_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct QuerySendDetailsBody {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, rename = "SmsSendDetailDTOs")]
    pub details: Option<DetailList>,
}

impl QuerySendDetailsBody {
    pub fn into_records(self) -> Vec<StatusResponse> {
        self.details
            .map(|list| list.items.into_iter().map(Detail::into_status).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct DetailList {
    #[serde(default, rename = "SmsSendDetailDTO")]
    pub items: Vec<Detail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Detail {
    #[serde(default)]
    pub phone_num: String,
    #[serde(default)]
    pub send_status: i64,
    #[serde(default)]
    pub err_code: String,
    #[serde(default)]
    pub send_date: String,
    #[serde(default)]
    pub receive_date: String,
    #[serde(default)]
    pub out_id: String,
}

impl Detail {
    pub fn into_status(self) -> StatusResponse {
        StatusResponse {
            msg_id: self.out_id,
            phone: self.phone_num,
            status: parse_status(self.send_status),
            sent_time: parse_date(&self.send_date),
            receive_time: parse_date(&self.receive_date),
            error_message: self.err_code,
        }
    }
}

/// 1 awaiting receipt, 2 failed, 3 delivered.
pub(super) fn parse_status(code: i64) -> MessageStatus {
    match code {
        1 => MessageStatus::Pending,
        2 => MessageStatus::Failed,
        3 => MessageStatus::Delivered,
        _ => MessageStatus::Unknown,
    }
}

/// `YYYY-MM-DD HH:MM:SS` to epoch seconds; empty or malformed is 0.
pub(super) fn parse_date(value: &str) -> i64 {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}
