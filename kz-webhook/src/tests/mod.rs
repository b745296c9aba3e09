mod admission_test;

use kz_testutils::*;
use rstest::*;

use super::*;
