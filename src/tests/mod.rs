mod container_tests;
mod vm_tests;
