mod cgroups;
pub use cgroups::{CgroupLimits, CpuMax};
pub use cgroups::{attach_cgroup, build_cgroup_name, cleanup_cgroup};

mod log;
