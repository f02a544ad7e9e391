//! PTP wire codec: container framing, strings, and the dataset layouts used
//! by the object transfer operations (spec.md §4.1, §6).

pub mod codes;
pub mod container;
pub mod object_info;
pub mod prop_list;
pub mod strings;

pub use codes::{ContainerType, DataTypeCode, ObjectFormatCode, ObjectPropCode, OperationCode, ResponseCode};
pub use container::ParamContainer;
pub use object_info::ObjectInfo;
pub use prop_list::{PropEntry, PropValue};
