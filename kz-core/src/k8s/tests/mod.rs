
use kz_testutils::*;
use rstest::*;

use super::*;
