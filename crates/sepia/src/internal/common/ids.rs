use crate::define_id_type;

define_id_type!(TaskId, u64);
define_id_type!(NodeId, u32);
define_id_type!(CoreId, u32);
define_id_type!(GpuId, u32);
