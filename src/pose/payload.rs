//! JSON キーポイントダンプの読み込み
//!
//! 対応する形:
//! - `{"persons": [{"keypoints": ...}]}`（`people` も可）
//! - トップレベルの `keypoints` / `pose_keypoints` / `pose_keypoints_2d`
//!
//! キーポイントは `{name, x, y, confidence}` の配列、または
//! 名前 → `{x, y, confidence}` / `[x, y, c]` のマップ。

use std::collections::HashMap;

use serde_json::Value;

use super::keypoint::{BBox, Detection, Keypoint, KeypointIndex};
use crate::posture::{AngleAnalysis, AngleAnalyzer, Axis, PostureAngles};

const KEYPOINT_KEYS: [&str; 3] = ["keypoints", "pose_keypoints", "pose_keypoints_2d"];
const ANGLE_KEYS: [&str; 4] = ["adjusted_angles", "personalized_angles", "angles", "reference_angles"];

#[derive(Debug, Clone, Copy, PartialEq)]
struct RawPoint {
    x: Option<f64>,
    y: Option<f64>,
    confidence: f32,
}

/// 有限の数値だけを返す（"NaN" などの文字列は捨てる）
fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// "leftEar" / "LEFT_EAR" / "left-ear" → "left_ear"
fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    let mut prev_lower = false;
    for c in name.trim().chars() {
        if c == '-' || c == ' ' {
            out.push('_');
            prev_lower = false;
            continue;
        }
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        out.push(c.to_ascii_lowercase());
    }
    out
}

fn joint_for(name: &Value) -> Option<KeypointIndex> {
    match name {
        Value::String(s) => KeypointIndex::from_name(&normalize_name(s)),
        Value::Number(n) => KeypointIndex::from_index(n.as_u64()? as usize),
        _ => None,
    }
}

/// `visible: false` なら信頼度 0
fn confidence_of(entry: &serde_json::Map<String, Value>) -> f32 {
    let visible = entry.get("visible").or_else(|| entry.get("is_visible"));
    if let Some(Value::Bool(false)) = visible {
        return 0.0;
    }
    ["confidence", "score", "probability"]
        .iter()
        .find_map(|k| number(entry.get(*k)))
        .unwrap_or(0.0) as f32
}

fn point_from_object(entry: &serde_json::Map<String, Value>) -> RawPoint {
    let position = entry.get("position").and_then(Value::as_object);
    let coord = |key: &str| {
        number(entry.get(key)).or_else(|| position.and_then(|p| number(p.get(key))))
    };
    RawPoint {
        x: coord("x"),
        y: coord("y"),
        confidence: confidence_of(entry),
    }
}

fn normalise_keypoints(raw: &Value) -> HashMap<KeypointIndex, RawPoint> {
    let mut lookup = HashMap::new();
    match raw {
        Value::Object(map) => {
            for (name, payload) in map {
                let Some(joint) = KeypointIndex::from_name(&normalize_name(name)) else {
                    continue;
                };
                let point = match payload {
                    Value::Object(entry) => point_from_object(entry),
                    Value::Array(items) if items.len() >= 3 => RawPoint {
                        x: number(items.first()),
                        y: number(items.get(1)),
                        confidence: number(items.get(2)).unwrap_or(0.0) as f32,
                    },
                    _ => continue,
                };
                lookup.insert(joint, point);
            }
        }
        Value::Array(entries) => {
            for entry in entries.iter().filter_map(Value::as_object) {
                let joint = ["part_name", "name", "part", "id"]
                    .iter()
                    .filter_map(|k| entry.get(*k))
                    .find_map(joint_for);
                if let Some(joint) = joint {
                    lookup.insert(joint, point_from_object(entry));
                }
            }
        }
        _ => {}
    }
    lookup
}

fn keypoints_lookup(payload: &Value) -> HashMap<KeypointIndex, RawPoint> {
    let Some(object) = payload.as_object() else {
        return HashMap::new();
    };

    let person = object
        .get("persons")
        .or_else(|| object.get("people"))
        .and_then(Value::as_array)
        .and_then(|persons| persons.first())
        .and_then(Value::as_object);

    for container in person.into_iter().chain(std::iter::once(object)) {
        for key in KEYPOINT_KEYS {
            if let Some(raw) = container.get(key) {
                let lookup = normalise_keypoints(raw);
                if !lookup.is_empty() {
                    return lookup;
                }
            }
        }
    }
    HashMap::new()
}

/// ダンプから1人分の `Detection` を組み立てる
///
/// 座標が読めない関節は未検出 (0,0,0) になる。BBox は検出できた点の外接矩形。
pub fn detection_from_payload(payload: &Value, frame_width: u32, frame_height: u32) -> Option<Detection> {
    let lookup = keypoints_lookup(payload);
    if lookup.is_empty() {
        return None;
    }

    let keypoints = std::array::from_fn(|i| {
        let joint = KeypointIndex::ALL[i];
        match lookup.get(&joint) {
            Some(RawPoint {
                x: Some(x),
                y: Some(y),
                confidence,
            }) => Keypoint::new(joint, *x as f32, *y as f32, *confidence),
            _ => Keypoint::missing(joint),
        }
    });

    let mut bbox: Option<BBox> = None;
    let mut confidence_sum = 0.0;
    let mut present = 0;
    for kp in keypoints.iter().filter(|k| !k.is_origin()) {
        confidence_sum += kp.confidence;
        present += 1;
        bbox = Some(match bbox {
            None => BBox::new(kp.x, kp.y, kp.x, kp.y),
            Some(b) => BBox::new(b.left.min(kp.x), b.top.min(kp.y), b.right.max(kp.x), b.bottom.max(kp.y)),
        });
    }
    let confidence = if present > 0 { confidence_sum / present as f32 } else { 0.0 };
    let bbox = bbox.unwrap_or(BBox::new(0.0, 0.0, 0.0, 0.0));

    Some(Detection::new(bbox, confidence, keypoints, frame_width, frame_height))
}

fn stored_angles(candidate: Option<&Value>) -> Option<PostureAngles> {
    let object = candidate?.as_object()?;
    let read = |axis: Axis| number(object.get(axis.name()));
    Some(PostureAngles::new(read(Axis::Neck)?, read(Axis::Back)?, read(Axis::Legs)?))
}

/// 保存済みの角度、なければキーポイントから角度を求める
pub fn angles_from_payload(payload: &Value, analyzer: &AngleAnalyzer) -> Option<PostureAngles> {
    if let Some(object) = payload.as_object() {
        if let Some(angles) = ANGLE_KEYS.iter().find_map(|k| stored_angles(object.get(*k))) {
            return Some(angles);
        }
        if let Some(angles) = stored_angles(Some(payload)) {
            return Some(angles);
        }
    }

    // 角度計算には座標のスケールは関係ない
    let detection = detection_from_payload(payload, 1, 1)?;
    match analyzer.analyze(&detection) {
        AngleAnalysis::Measured { angles, .. } => Some(angles),
        _ => None,
    }
}
