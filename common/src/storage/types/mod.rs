use serde::{Deserialize, Serialize};
pub mod image_record;

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn kind_name() -> &'static str;
    fn get_id(&self) -> &str;
}
