mod sql_tests;
