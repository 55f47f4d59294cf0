//! TypedJob trait - payload の型と handler 型名を対応付ける

use serde::Serialize;
use serde::de::DeserializeOwned;

/// TypedJob は handler 型名と payload の型を対応付ける
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Resize { width: u32, height: u32 }
///
/// impl TypedJob for Resize {
///     const TYPE: &'static str = "images.resize.v1";
/// }
/// ```
pub trait TypedJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// JobSpec の `handler` に書く型名
    const TYPE: &'static str;
}
