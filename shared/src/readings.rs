//! Helpers for telemetry payloads published by relayr devices.
//!
//! A device reading message looks like
//! `{"deviceId": "...", "received": 1438000000000, "readings": [{"meaning": "temperature", "value": 21.5}]}`.

use crate::types::{Device, StreamError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub meaning: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadingsPayload {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<i64>,
    #[serde(default)]
    pub readings: Vec<Reading>,
}

impl ReadingsPayload {
    pub fn parse(payload: &[u8]) -> Result<Self, StreamError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Flattens the readings into `meaning -> value`. A later reading with
    /// the same meaning replaces an earlier one.
    pub fn simplify(&self) -> BTreeMap<String, serde_json::Value> {
        self.readings
            .iter()
            .map(|reading| (reading.meaning.clone(), reading.value.clone()))
            .collect()
    }
}

// 根据 payload 中的 deviceId 找到对应设备
pub fn resolve_device<'a>(
    devices: &'a [Device],
    payload: &ReadingsPayload,
) -> Result<&'a Device, StreamError> {
    devices
        .iter()
        .find(|device| device.id == payload.device_id)
        .ok_or_else(|| StreamError::UnknownDevice(payload.device_id.clone()))
}
